//! Swap state machine
//!
//! One logical instance per order. Transitions are pure: `(order, input)`
//! yields the next state plus any actions to dispatch, and never blocks or
//! performs I/O. The engine owns persistence and dispatch around this.

use crate::events::{EscrowEventKind, Leg};
use crate::swap::order::SwapOrder;

use serde::{Deserialize, Serialize};

/// Lifecycle states of a swap order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapState {
    /// Waiting for funding events on both legs.
    AwaitingFunding,
    /// Both escrows confirmed funded; the destination claim (which publishes
    /// the secret) is due.
    BothFunded,
    /// The destination claim transaction has been accepted by the chain; the
    /// preimage is out.
    SecretRevealed,
    /// Destination claim confirmed on-chain.
    DestClaimed,
    /// Source claim confirmed; swap done.
    Completed,
    /// Abandoning the swap, destination refund first.
    RefundingDest,
    /// Refunding the source leg (dest already settled or never funded).
    RefundingSource,
    /// Every funded leg refunded.
    RefundedBoth,
    /// Neither leg funded before the destination timeout.
    ExpiredUnfunded,
    /// Contradictory on-chain observations. Automation halts; an operator
    /// has to look at this order.
    Inconsistent,
}

impl SwapState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapState::AwaitingFunding => "awaiting_funding",
            SwapState::BothFunded => "both_funded",
            SwapState::SecretRevealed => "secret_revealed",
            SwapState::DestClaimed => "dest_claimed",
            SwapState::Completed => "completed",
            SwapState::RefundingDest => "refunding_dest",
            SwapState::RefundingSource => "refunding_source",
            SwapState::RefundedBoth => "refunded_both",
            SwapState::ExpiredUnfunded => "expired_unfunded",
            SwapState::Inconsistent => "inconsistent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "awaiting_funding" => SwapState::AwaitingFunding,
            "both_funded" => SwapState::BothFunded,
            "secret_revealed" => SwapState::SecretRevealed,
            "dest_claimed" => SwapState::DestClaimed,
            "completed" => SwapState::Completed,
            "refunding_dest" => SwapState::RefundingDest,
            "refunding_source" => SwapState::RefundingSource,
            "refunded_both" => SwapState::RefundedBoth,
            "expired_unfunded" => SwapState::ExpiredUnfunded,
            "inconsistent" => SwapState::Inconsistent,
            _ => return None,
        })
    }

    /// Terminal states are archived after the retention window.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapState::Completed | SwapState::RefundedBoth | SwapState::ExpiredUnfunded
        )
    }

    /// States in which no further automated action is taken.
    pub fn is_halted(&self) -> bool {
        self.is_terminal() || *self == SwapState::Inconsistent
    }
}

impl std::fmt::Display for SwapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs consumed by the state machine.
#[derive(Debug, Clone)]
pub enum SwapInput {
    /// A normalized escrow event, resolved to a leg of this order.
    Leg {
        leg: Leg,
        kind: EscrowEventKind,
        block: u64,
    },
    /// The dispatcher reports the destination claim was accepted by the RPC;
    /// the preimage is public from this point on.
    SecretPublished,
    /// Periodic timer tick carrying the confirmed head of each leg's chain.
    Tick {
        source_height: u64,
        dest_height: u64,
    },
}

/// Outbound transaction intents the machine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActionKind {
    /// Claim the destination escrow, disclosing the secret.
    ClaimDest,
    /// Claim the source escrow with the now-public secret.
    ClaimSource,
    RefundDest,
    RefundSource,
}

impl ActionKind {
    pub fn leg(&self) -> Leg {
        match self {
            ActionKind::ClaimDest | ActionKind::RefundDest => Leg::Dest,
            ActionKind::ClaimSource | ActionKind::RefundSource => Leg::Source,
        }
    }

    pub fn is_claim(&self) -> bool {
        matches!(self, ActionKind::ClaimDest | ActionKind::ClaimSource)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ClaimDest => "claim_dest",
            ActionKind::ClaimSource => "claim_source",
            ActionKind::RefundDest => "refund_dest",
            ActionKind::RefundSource => "refund_source",
        }
    }
}

/// Result of applying one input to an order.
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// The order record changed and must be persisted.
    pub changed: bool,
    /// Transaction intents to hand to the dispatcher. Duplicates are
    /// absorbed by the dispatcher's per-(order, leg) in-flight guard.
    pub actions: Vec<ActionKind>,
    /// A critical contradiction was observed; surfaced to monitoring.
    pub anomaly: Option<String>,
}

impl StepOutcome {
    fn noop() -> Self {
        Self::default()
    }
}

/// Apply one input to an order. The only place order state ever changes.
pub fn step(order: &mut SwapOrder, input: &SwapInput) -> StepOutcome {
    match input {
        SwapInput::Leg { leg, kind, block } => apply_leg_event(order, *leg, kind, *block),
        SwapInput::SecretPublished => apply_secret_published(order),
        SwapInput::Tick {
            source_height,
            dest_height,
        } => apply_tick(order, *source_height, *dest_height),
    }
}

fn apply_leg_event(
    order: &mut SwapOrder,
    leg: Leg,
    kind: &EscrowEventKind,
    block: u64,
) -> StepOutcome {
    let view_changed = order.leg_mut(leg).record(kind, block);
    if !view_changed {
        // At-least-once delivery: a replayed event is a no-op.
        return StepOutcome::noop();
    }

    if order.state == SwapState::Inconsistent {
        // Halted; keep recording observations for the operator.
        return StepOutcome {
            changed: true,
            ..Default::default()
        };
    }

    // Contradictions outrank every other transition.
    if let Some(anomaly) = detect_contradiction(order) {
        order.state = SwapState::Inconsistent;
        order.needs_attention = true;
        return StepOutcome {
            changed: true,
            actions: Vec::new(),
            anomaly: Some(anomaly),
        };
    }

    // The prescribed dest-claimed/source-refunded outcome degrades to a
    // flagged partial refund rather than halting.
    if order.dest_leg.claimed() && order.source_leg.refunded() {
        order.state = SwapState::RefundingSource;
        order.needs_attention = true;
        return StepOutcome {
            changed: true,
            actions: Vec::new(),
            anomaly: Some(format!(
                "partial refund on order {}: dest claimed at {:?}, source refunded at {:?}",
                order.id_hex(),
                order.dest_leg.claimed_at,
                order.source_leg.refunded_at
            )),
        };
    }

    let mut actions = Vec::new();

    let next = match order.state {
        SwapState::AwaitingFunding => {
            if order.both_funded() {
                if order.dest_leg.claimed() {
                    // Funding and claim both observed in one scan window.
                    actions.push(ActionKind::ClaimSource);
                    SwapState::DestClaimed
                } else {
                    actions.push(ActionKind::ClaimDest);
                    SwapState::BothFunded
                }
            } else {
                order.state
            }
        }

        SwapState::BothFunded | SwapState::SecretRevealed => {
            if leg == Leg::Dest && matches!(kind, EscrowEventKind::Claimed { .. }) {
                actions.push(ActionKind::ClaimSource);
                SwapState::DestClaimed
            } else if matches!(kind, EscrowEventKind::Refunded) {
                // A refund landed while the claim path was live; abandon it.
                if !order.dest_leg.refund_settled() && !order.dest_leg.claimed() {
                    actions.push(ActionKind::RefundDest);
                }
                SwapState::RefundingDest
            } else {
                order.state
            }
        }

        SwapState::DestClaimed => {
            if leg == Leg::Source && matches!(kind, EscrowEventKind::Claimed { .. }) {
                SwapState::Completed
            } else {
                order.state
            }
        }

        SwapState::RefundingDest | SwapState::RefundingSource => {
            if leg == Leg::Dest && matches!(kind, EscrowEventKind::Claimed { .. }) {
                // The claim landed after all; resume the happy path.
                actions.push(ActionKind::ClaimSource);
                SwapState::DestClaimed
            } else if order.source_leg.refund_settled() && order.dest_leg.refund_settled() {
                SwapState::RefundedBoth
            } else {
                order.state
            }
        }

        // Terminal states: observations were recorded above; contradiction
        // detection already ran.
        SwapState::Completed
        | SwapState::RefundedBoth
        | SwapState::ExpiredUnfunded
        | SwapState::Inconsistent => order.state,
    };

    order.state = next;
    StepOutcome {
        changed: true,
        actions,
        anomaly: None,
    }
}

fn apply_secret_published(order: &mut SwapOrder) -> StepOutcome {
    if order.state == SwapState::BothFunded {
        order.state = SwapState::SecretRevealed;
        StepOutcome {
            changed: true,
            ..Default::default()
        }
    } else {
        // Late or duplicate report; the event stream has moved the order on.
        StepOutcome::noop()
    }
}

fn apply_tick(order: &mut SwapOrder, source_height: u64, dest_height: u64) -> StepOutcome {
    if order.state.is_halted() {
        return StepOutcome::noop();
    }

    let mut actions = Vec::new();
    let mut changed = false;

    let next = match order.state {
        SwapState::AwaitingFunding => {
            let src = &order.source_leg;
            let dst = &order.dest_leg;
            if !src.funded() && !dst.funded() && dest_height >= order.timeout_dest {
                changed = true;
                SwapState::ExpiredUnfunded
            } else if src.funded() && !dst.funded() && source_height >= order.timeout_source {
                changed = true;
                actions.push(ActionKind::RefundSource);
                SwapState::RefundingSource
            } else if dst.funded() && !src.funded() && dest_height >= order.timeout_dest {
                changed = true;
                actions.push(ActionKind::RefundDest);
                SwapState::RefundingDest
            } else {
                order.state
            }
        }

        SwapState::BothFunded | SwapState::SecretRevealed => {
            if dest_height >= order.timeout_dest && !order.dest_leg.claimed() {
                changed = true;
                actions.push(ActionKind::RefundDest);
                SwapState::RefundingDest
            } else {
                // Re-derive the pending claim; covers restart recovery and
                // lost submissions. The dispatcher drops it while one is in
                // flight.
                actions.push(ActionKind::ClaimDest);
                order.state
            }
        }

        SwapState::DestClaimed => {
            if source_height >= order.timeout_source && !order.source_leg.claimed() {
                changed = true;
                actions.push(ActionKind::RefundSource);
                SwapState::RefundingSource
            } else if !order.source_leg.claimed() {
                actions.push(ActionKind::ClaimSource);
                order.state
            } else {
                order.state
            }
        }

        SwapState::RefundingDest => {
            let dst = &order.dest_leg;
            if dst.funded() && !dst.claimed() && !dst.refunded() {
                actions.push(ActionKind::RefundDest);
            }
            let src = &order.source_leg;
            if src.funded()
                && !src.claimed()
                && !src.refunded()
                && source_height >= order.timeout_source
            {
                actions.push(ActionKind::RefundSource);
            }
            order.state
        }

        SwapState::RefundingSource => {
            let src = &order.source_leg;
            if src.funded()
                && !src.claimed()
                && !src.refunded()
                && source_height >= order.timeout_source
            {
                actions.push(ActionKind::RefundSource);
            }
            let dst = &order.dest_leg;
            if dst.funded() && !dst.claimed() && !dst.refunded() && dest_height >= order.timeout_dest
            {
                actions.push(ActionKind::RefundDest);
            }
            order.state
        }

        // is_halted() filtered these already
        _ => order.state,
    };

    order.state = next;
    StepOutcome {
        changed,
        actions,
        anomaly: None,
    }
}

/// Same-leg claim+refund, or the fund-loss cross-leg combination where the
/// secret went public on the source leg while the destination refunded.
fn detect_contradiction(order: &SwapOrder) -> Option<String> {
    for (name, view) in [("source", &order.source_leg), ("dest", &order.dest_leg)] {
        if view.contradictory() {
            let earlier = match (view.claimed_at, view.refunded_at) {
                (Some(c), Some(r)) if c <= r => format!("claimed first at block {}", c),
                (Some(_), Some(r)) => format!("refunded first at block {}", r),
                _ => continue,
            };
            return Some(format!(
                "order {}: {} leg both claimed ({:?}) and refunded ({:?}); {}",
                hex::encode(order.order_id),
                name,
                view.claimed_at,
                view.refunded_at,
                earlier
            ));
        }
    }

    if order.source_leg.claimed() && order.dest_leg.refunded() {
        return Some(format!(
            "order {}: source leg claimed at {:?} while dest leg refunded at {:?}",
            hex::encode(order.order_id),
            order.source_leg.claimed_at,
            order.dest_leg.refunded_at
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::order::NewSwapOrder;
    use chrono::Utc;
    use ethers::types::U256;

    const TIMEOUT_DEST: u64 = 500;
    const TIMEOUT_SOURCE: u64 = 600;

    fn order() -> SwapOrder {
        NewSwapOrder {
            order_id: [1u8; 32],
            source_chain: 1,
            dest_chain: 137,
            hashlock: [2u8; 32],
            source_escrow: "0xaaaa".to_string(),
            dest_escrow: "0xbbbb".to_string(),
            maker_amount: U256::from(100u64),
            taker_amount: U256::from(200u64),
            timeout_source: TIMEOUT_SOURCE,
            timeout_dest: TIMEOUT_DEST,
        }
        .into_order(Utc::now())
        .unwrap()
    }

    fn funded(leg: Leg, block: u64) -> SwapInput {
        SwapInput::Leg {
            leg,
            kind: EscrowEventKind::Funded {
                hashlock: [2u8; 32],
                amount: U256::from(100u64),
                timeout: if leg == Leg::Source {
                    TIMEOUT_SOURCE
                } else {
                    TIMEOUT_DEST
                },
            },
            block,
        }
    }

    fn claimed(leg: Leg, block: u64) -> SwapInput {
        SwapInput::Leg {
            leg,
            kind: EscrowEventKind::Claimed { secret: [9u8; 32] },
            block,
        }
    }

    fn refunded(leg: Leg, block: u64) -> SwapInput {
        SwapInput::Leg {
            leg,
            kind: EscrowEventKind::Refunded,
            block,
        }
    }

    fn tick(source_height: u64, dest_height: u64) -> SwapInput {
        SwapInput::Tick {
            source_height,
            dest_height,
        }
    }

    #[test]
    fn happy_path_completes() {
        // Scenario: both legs fund at heights 100/101, coordinator claims
        // dest (revealing the secret), then source, ending Completed.
        let mut o = order();

        let out = step(&mut o, &funded(Leg::Source, 100));
        assert_eq!(o.state, SwapState::AwaitingFunding);
        assert!(out.actions.is_empty());

        let out = step(&mut o, &funded(Leg::Dest, 101));
        assert_eq!(o.state, SwapState::BothFunded);
        assert_eq!(out.actions, vec![ActionKind::ClaimDest]);

        let out = step(&mut o, &SwapInput::SecretPublished);
        assert!(out.changed);
        assert_eq!(o.state, SwapState::SecretRevealed);

        let out = step(&mut o, &claimed(Leg::Dest, 110));
        assert_eq!(o.state, SwapState::DestClaimed);
        assert_eq!(out.actions, vec![ActionKind::ClaimSource]);

        let out = step(&mut o, &claimed(Leg::Source, 115));
        assert_eq!(o.state, SwapState::Completed);
        assert!(out.actions.is_empty());
        assert!(out.anomaly.is_none());
    }

    #[test]
    fn funding_order_is_a_join_not_a_sequence() {
        let mut o = order();
        step(&mut o, &funded(Leg::Dest, 101));
        assert_eq!(o.state, SwapState::AwaitingFunding);
        let out = step(&mut o, &funded(Leg::Source, 102));
        assert_eq!(o.state, SwapState::BothFunded);
        assert_eq!(out.actions, vec![ActionKind::ClaimDest]);
    }

    #[test]
    fn fast_path_dest_claim_skips_secret_revealed() {
        let mut o = order();
        step(&mut o, &funded(Leg::Source, 100));
        step(&mut o, &funded(Leg::Dest, 101));
        // Claim confirms before the submission report arrives
        let out = step(&mut o, &claimed(Leg::Dest, 105));
        assert_eq!(o.state, SwapState::DestClaimed);
        assert_eq!(out.actions, vec![ActionKind::ClaimSource]);

        // The late submission report is a no-op
        let out = step(&mut o, &SwapInput::SecretPublished);
        assert!(!out.changed);
        assert_eq!(o.state, SwapState::DestClaimed);
    }

    #[test]
    fn replayed_events_are_noops() {
        let mut o = order();
        step(&mut o, &funded(Leg::Source, 100));
        let out = step(&mut o, &funded(Leg::Dest, 101));
        assert_eq!(out.actions, vec![ActionKind::ClaimDest]);

        // Same event again: no transition, no duplicate action
        let out = step(&mut o, &funded(Leg::Dest, 101));
        assert!(!out.changed);
        assert!(out.actions.is_empty());
        assert_eq!(o.state, SwapState::BothFunded);
    }

    #[test]
    fn never_funded_expires_without_actions() {
        // Scenario: destination leg never funded before its timeout.
        let mut o = order();

        let out = step(&mut o, &tick(TIMEOUT_DEST - 1, TIMEOUT_DEST - 1));
        assert_eq!(o.state, SwapState::AwaitingFunding);
        assert!(out.actions.is_empty());

        let out = step(&mut o, &tick(TIMEOUT_DEST, TIMEOUT_DEST));
        assert_eq!(o.state, SwapState::ExpiredUnfunded);
        assert!(out.actions.is_empty());

        // Ticks past expiry stay put
        let out = step(&mut o, &tick(TIMEOUT_SOURCE + 10, TIMEOUT_SOURCE + 10));
        assert!(!out.changed);
        assert!(out.actions.is_empty());
    }

    #[test]
    fn source_funded_alone_refunds_after_source_timeout() {
        let mut o = order();
        step(&mut o, &funded(Leg::Source, 100));

        // Dest timeout alone does not trigger a speculative source refund
        let out = step(&mut o, &tick(TIMEOUT_DEST, TIMEOUT_DEST));
        assert_eq!(o.state, SwapState::AwaitingFunding);
        assert!(out.actions.is_empty());

        let out = step(&mut o, &tick(TIMEOUT_SOURCE, TIMEOUT_SOURCE));
        assert_eq!(o.state, SwapState::RefundingSource);
        assert_eq!(out.actions, vec![ActionKind::RefundSource]);

        let out = step(&mut o, &refunded(Leg::Source, TIMEOUT_SOURCE + 5));
        assert_eq!(o.state, SwapState::RefundedBoth);
        assert!(out.anomaly.is_none());
    }

    #[test]
    fn dest_timeout_unclaimed_moves_to_refunding_dest() {
        let mut o = order();
        step(&mut o, &funded(Leg::Source, 100));
        step(&mut o, &funded(Leg::Dest, 101));
        step(&mut o, &SwapInput::SecretPublished);

        let out = step(&mut o, &tick(TIMEOUT_DEST, TIMEOUT_DEST));
        assert_eq!(o.state, SwapState::RefundingDest);
        assert_eq!(out.actions, vec![ActionKind::RefundDest]);

        // Source refund waits for its own timeout
        let out = step(&mut o, &tick(TIMEOUT_DEST + 1, TIMEOUT_DEST + 1));
        assert_eq!(out.actions, vec![ActionKind::RefundDest]);

        let out = step(&mut o, &refunded(Leg::Dest, TIMEOUT_DEST + 2));
        assert_eq!(o.state, SwapState::RefundingDest);
        assert!(out.actions.is_empty());

        let out = step(&mut o, &tick(TIMEOUT_SOURCE, TIMEOUT_SOURCE));
        assert_eq!(out.actions, vec![ActionKind::RefundSource]);

        let out = step(&mut o, &refunded(Leg::Source, TIMEOUT_SOURCE + 3));
        assert_eq!(o.state, SwapState::RefundedBoth);
        assert!(out.anomaly.is_none());
    }

    #[test]
    fn same_leg_claim_then_refund_is_inconsistent() {
        // Scenario: dest leg claimed, then a refund event is (incorrectly)
        // observed on the same leg.
        let mut o = order();
        step(&mut o, &funded(Leg::Source, 100));
        step(&mut o, &funded(Leg::Dest, 101));
        step(&mut o, &claimed(Leg::Dest, 110));
        assert_eq!(o.state, SwapState::DestClaimed);

        let out = step(&mut o, &refunded(Leg::Dest, 112));
        assert_eq!(o.state, SwapState::Inconsistent);
        assert!(o.needs_attention);
        let anomaly = out.anomaly.expect("contradiction must be surfaced");
        assert!(anomaly.contains("claimed first"));
        assert!(out.actions.is_empty());

        // Halted: no input produces further actions
        let out = step(&mut o, &tick(TIMEOUT_SOURCE + 10, TIMEOUT_SOURCE + 10));
        assert!(out.actions.is_empty());
        assert_eq!(o.state, SwapState::Inconsistent);
    }

    #[test]
    fn source_claimed_with_dest_refunded_is_inconsistent() {
        let mut o = order();
        step(&mut o, &funded(Leg::Source, 100));
        step(&mut o, &funded(Leg::Dest, 101));
        step(&mut o, &tick(TIMEOUT_DEST, TIMEOUT_DEST));
        assert_eq!(o.state, SwapState::RefundingDest);
        step(&mut o, &refunded(Leg::Dest, TIMEOUT_DEST + 2));

        // Secret somehow went public and the source got claimed anyway
        let out = step(&mut o, &claimed(Leg::Source, TIMEOUT_DEST + 5));
        assert_eq!(o.state, SwapState::Inconsistent);
        assert!(out.anomaly.is_some());
    }

    #[test]
    fn source_refund_after_dest_claim_degrades_to_flagged_partial() {
        // The prescribed escape: dest claimed, source never claimed before
        // its timeout, source refunds. Flagged, not halted.
        let mut o = order();
        step(&mut o, &funded(Leg::Source, 100));
        step(&mut o, &funded(Leg::Dest, 101));
        step(&mut o, &claimed(Leg::Dest, 110));

        let out = step(&mut o, &tick(TIMEOUT_SOURCE, TIMEOUT_SOURCE));
        assert_eq!(o.state, SwapState::RefundingSource);
        assert_eq!(out.actions, vec![ActionKind::RefundSource]);

        let out = step(&mut o, &refunded(Leg::Source, TIMEOUT_SOURCE + 2));
        assert_eq!(o.state, SwapState::RefundingSource);
        assert!(o.needs_attention);
        assert!(out.anomaly.expect("flagged").contains("partial refund"));
    }

    #[test]
    fn tick_rederives_pending_claims_for_recovery() {
        let mut o = order();
        step(&mut o, &funded(Leg::Source, 100));
        step(&mut o, &funded(Leg::Dest, 101));

        // As after a restart: still BothFunded, claim not yet confirmed
        let out = step(&mut o, &tick(200, 200));
        assert!(!out.changed);
        assert_eq!(out.actions, vec![ActionKind::ClaimDest]);

        step(&mut o, &claimed(Leg::Dest, 210));
        let out = step(&mut o, &tick(220, 220));
        assert_eq!(out.actions, vec![ActionKind::ClaimSource]);
    }

    #[test]
    fn late_dest_claim_during_refunding_resumes_happy_path() {
        let mut o = order();
        step(&mut o, &funded(Leg::Source, 100));
        step(&mut o, &funded(Leg::Dest, 101));
        step(&mut o, &tick(TIMEOUT_DEST, TIMEOUT_DEST));
        assert_eq!(o.state, SwapState::RefundingDest);

        // Our earlier claim confirms after the timeout tick
        let out = step(&mut o, &claimed(Leg::Dest, TIMEOUT_DEST + 1));
        assert_eq!(o.state, SwapState::DestClaimed);
        assert_eq!(out.actions, vec![ActionKind::ClaimSource]);
    }

    #[test]
    fn dest_funded_alone_refunds_after_dest_timeout() {
        let mut o = order();
        step(&mut o, &funded(Leg::Dest, 101));

        let out = step(&mut o, &tick(TIMEOUT_DEST, TIMEOUT_DEST));
        assert_eq!(o.state, SwapState::RefundingDest);
        assert_eq!(out.actions, vec![ActionKind::RefundDest]);

        let out = step(&mut o, &refunded(Leg::Dest, TIMEOUT_DEST + 2));
        // Source never funded, nothing left to settle there
        assert_eq!(o.state, SwapState::RefundedBoth);
        assert!(out.anomaly.is_none());
    }
}
