//! Swap coordination core
//!
//! The state machine decides, the engine orchestrates:
//! 1. Watchers feed normalized escrow events into the engine
//! 2. The per-order transition function picks the next state and actions
//! 3. The dispatcher submits actions and reports outcomes back
//! 4. Timer ticks drive timeout escapes and recovery re-derivation

pub mod engine;
pub mod machine;
pub mod order;

pub use engine::SwapEngine;
pub use machine::{ActionKind, SwapInput, SwapState};
pub use order::{LegView, NewSwapOrder, SwapOrder};
