//! Payload generators for the default workflow mix
//!
//! All generators are pure functions of (simulated-user-id, iteration), so a
//! seeded run replays the exact same parameter stream. Message bodies cycle
//! through a small set of sizes to exercise small, medium and large payload
//! paths without a separate payload-size scenario.

use std::time::Duration;

use crate::protocol::ActionParams;
use crate::scenario::PayloadGenerator;

const BODY_SIZES: [usize; 3] = [256, 2048, 16 * 1024];
const FILLER: &str = "The quick brown fox jumps over the lazy dog. ";

const SEARCH_TERMS: [&str; 6] = [
    "invoice",
    "meeting",
    "urgent",
    "newsletter",
    "report",
    "reminder",
];

fn body_of_size(size: usize) -> String {
    let mut body = String::with_capacity(size + FILLER.len());
    while body.len() < size {
        body.push_str(FILLER);
    }
    body.truncate(size);
    body
}

/// Deterministic message id for API operations on synthetic messages
fn message_id(user_id: u64, iteration: u64) -> String {
    format!("msg-{user_id}-{iteration}")
}

/// Generates submission payloads: sender and recipients drawn from the
/// load-test account space, body size cycling through the size ladder.
pub struct MessageGenerator {
    domain: String,
    partitions: u64,
}

impl MessageGenerator {
    pub fn new(domain: String, partitions: u64) -> Self {
        Self { domain, partitions }
    }

    fn address(&self, partition: u64) -> String {
        format!("loadtest-{partition}@{}", self.domain)
    }
}

impl PayloadGenerator for MessageGenerator {
    fn generate(&self, user_id: u64, iteration: u64) -> ActionParams {
        let from = self.address(user_id % self.partitions);
        let recipient_count = 1 + (iteration % 3) as u64;
        let to = (1..=recipient_count)
            .map(|k| self.address((user_id + k) % self.partitions))
            .collect();
        let size = BODY_SIZES[(iteration as usize) % BODY_SIZES.len()];
        ActionParams::SendMessage {
            from,
            to,
            subject: format!("load test {user_id}/{iteration}"),
            body: body_of_size(size),
        }
    }
}

/// Generates mailbox fetch batches of varying width
#[derive(Default)]
pub struct MailboxSyncGenerator;

impl PayloadGenerator for MailboxSyncGenerator {
    fn generate(&self, _user_id: u64, iteration: u64) -> ActionParams {
        ActionParams::FetchMailbox {
            mailbox: "INBOX".to_string(),
            batch: 10 + (iteration % 40) as u32,
        }
    }
}

/// Generates short idle windows on the inbox
#[derive(Default)]
pub struct IdleGenerator;

impl PayloadGenerator for IdleGenerator {
    fn generate(&self, _user_id: u64, iteration: u64) -> ActionParams {
        ActionParams::IdleMailbox {
            mailbox: "INBOX".to_string(),
            wait: Duration::from_millis(1000 + (iteration % 3) * 500),
        }
    }
}

/// Alternates between paging the message list and fetching one message
#[derive(Default)]
pub struct BrowseGenerator;

impl PayloadGenerator for BrowseGenerator {
    fn generate(&self, user_id: u64, iteration: u64) -> ActionParams {
        if iteration % 3 == 0 {
            ActionParams::FetchMessage {
                message_id: message_id(user_id, iteration / 3),
            }
        } else {
            ActionParams::ListMessages {
                page: (iteration % 10) as u32,
                page_size: 25,
            }
        }
    }
}

/// Rotates through a fixed query vocabulary
#[derive(Default)]
pub struct SearchGenerator;

impl PayloadGenerator for SearchGenerator {
    fn generate(&self, _user_id: u64, iteration: u64) -> ActionParams {
        ActionParams::SearchMessages {
            query: SEARCH_TERMS[(iteration as usize) % SEARCH_TERMS.len()].to_string(),
        }
    }
}

/// Alternates mark and delete on synthetic message ids
#[derive(Default)]
pub struct TriageGenerator;

impl PayloadGenerator for TriageGenerator {
    fn generate(&self, user_id: u64, iteration: u64) -> ActionParams {
        if iteration % 2 == 0 {
            ActionParams::MarkMessage {
                message_id: message_id(user_id, iteration),
                flag: "seen".to_string(),
            }
        } else {
            ActionParams::DeleteMessage {
                message_id: message_id(user_id, iteration),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generators_are_deterministic() {
        let gen = MessageGenerator::new("example.com".to_string(), 500);
        let a = gen.generate(42, 7);
        let b = gen.generate(42, 7);
        match (a, b) {
            (
                ActionParams::SendMessage {
                    from: f1,
                    to: t1,
                    subject: s1,
                    body: b1,
                },
                ActionParams::SendMessage {
                    from: f2,
                    to: t2,
                    subject: s2,
                    body: b2,
                },
            ) => {
                assert_eq!(f1, f2);
                assert_eq!(t1, t2);
                assert_eq!(s1, s2);
                assert_eq!(b1, b2);
            }
            _ => panic!("expected send_message params"),
        }
    }

    #[test]
    fn test_body_sizes_cycle() {
        let gen = MessageGenerator::new("example.com".to_string(), 500);
        for (iteration, expected) in [(0u64, 256usize), (1, 2048), (2, 16 * 1024), (3, 256)] {
            match gen.generate(1, iteration) {
                ActionParams::SendMessage { body, .. } => assert_eq!(body.len(), expected),
                _ => panic!("expected send_message params"),
            }
        }
    }

    #[test]
    fn test_recipient_fanout_stays_in_account_space() {
        let gen = MessageGenerator::new("example.com".to_string(), 10);
        match gen.generate(9, 2) {
            ActionParams::SendMessage { to, .. } => {
                assert_eq!(to.len(), 3);
                assert!(to.iter().all(|addr| addr.ends_with("@example.com")));
            }
            _ => panic!("expected send_message params"),
        }
    }

    #[test]
    fn test_triage_alternates_mark_and_delete() {
        let gen = TriageGenerator;
        assert!(matches!(
            gen.generate(1, 0),
            ActionParams::MarkMessage { .. }
        ));
        assert!(matches!(
            gen.generate(1, 1),
            ActionParams::DeleteMessage { .. }
        ));
    }
}
