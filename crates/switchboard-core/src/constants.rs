//! Protocol constants shared by the engine.

use std::time::Duration;

/// MQTT quality of service used for every publish and subscription.
pub const QOS: u8 = 1;

/// Page size for contact-key and message backfill requests.
pub const PAGE_SIZE: u32 = 100;

/// Delay between the register publish and its dependent publishes.
pub const REGISTER_DELAY_MS: u64 = 250;

/// [`REGISTER_DELAY_MS`] as a `Duration`.
pub const REGISTER_DELAY: Duration = Duration::from_millis(REGISTER_DELAY_MS);

/// Smallest amount a tribe message may carry. Lower or absent amounts are
/// bumped up to this.
pub const MIN_TRIBE_MESSAGE_SATS: u64 = 3;

/// Cost of deleting a message in a tribe.
pub const TRIBE_DELETE_COST_SATS: u64 = 1;

/// Cost of deleting a message in a direct chat.
pub const DIRECT_DELETE_COST_SATS: u64 = 0;

/// Share of restore progress owned by the contacts phase (percent).
pub const CONTACTS_RESTORE_WEIGHT: u8 = 4;

/// Share of restore progress owned by the messages phase (percent).
pub const MESSAGES_RESTORE_WEIGHT: u8 = 100 - CONTACTS_RESTORE_WEIGHT;

/// Default TLS broker port.
pub const PRODUCTION_PORT: u16 = 8883;

/// Default plaintext broker port.
pub const TEST_PORT: u16 = 1883;

/// Settlement and sent statuses that complete a round trip.
pub const STATUS_COMPLETE: &str = "COMPLETE";

/// Tribe amount normalization: absent or too-small amounts become the minimum.
pub fn tribe_message_amount(requested: Option<u64>) -> u64 {
    requested.unwrap_or(0).max(MIN_TRIBE_MESSAGE_SATS)
}

/// Cost of a delete message.
pub const fn delete_cost(is_tribe: bool) -> u64 {
    if is_tribe { TRIBE_DELETE_COST_SATS } else { DIRECT_DELETE_COST_SATS }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tribe_amount_bumped_to_minimum() {
        assert_eq!(tribe_message_amount(None), 3);
        assert_eq!(tribe_message_amount(Some(0)), 3);
        assert_eq!(tribe_message_amount(Some(2)), 3);
        assert_eq!(tribe_message_amount(Some(50)), 50);
    }

    #[test]
    fn delete_costs_depend_on_chat_kind() {
        assert_eq!(delete_cost(true), 1);
        assert_eq!(delete_cost(false), 0);
    }

    #[test]
    fn restore_weights_cover_full_range() {
        assert_eq!(u32::from(CONTACTS_RESTORE_WEIGHT) + u32::from(MESSAGES_RESTORE_WEIGHT), 100);
    }
}
