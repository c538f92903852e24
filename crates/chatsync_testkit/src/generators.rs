//! Property-based test generators using proptest.
//!
//! Provides strategies for generating request payloads and scripts of
//! chat activity that respect the server's validation rules.

use chatsync_protocol::{HistoryCursor, SyncCursor};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for generating arbitrary UUIDs.
pub fn uuid_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

/// Strategy for generating valid usernames.
pub fn username_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{2,15}").expect("Invalid regex")
}

/// Strategy for generating valid message content, including non-ASCII text.
pub fn content_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 äöüß😀.,!?]{1,64}")
        .expect("Invalid regex")
        .prop_filter("Content must not be empty", |s| !s.is_empty())
}

/// Strategy for generating page sizes.
pub fn page_size_strategy() -> impl Strategy<Value = usize> {
    1usize..=20
}

/// Strategy for generating message feed cursors.
pub fn sync_cursor_strategy() -> impl Strategy<Value = SyncCursor> {
    (any::<u64>(), uuid_strategy(), prop::option::of(uuid_strategy())).prop_map(
        |(version, entity, oldest)| {
            let cursor = SyncCursor::new(version, entity);
            match oldest {
                Some(oldest) => cursor.with_oldest_message(oldest),
                None => cursor,
            }
        },
    )
}

/// Strategy for generating history cursors.
pub fn history_cursor_strategy() -> impl Strategy<Value = HistoryCursor> {
    uuid_strategy().prop_map(HistoryCursor::new)
}

/// One step of chat activity in a single conversation.
///
/// Indices are resolved modulo the number of participants or of
/// messages sent so far, so every generated script is applicable.
#[derive(Debug, Clone)]
pub enum ChatAction {
    /// Post a message
    Send {
        /// Index of the author
        author: usize,
        /// Message body
        content: String,
    },
    /// Edit an earlier message as its author
    Edit {
        /// Index of the message
        target: usize,
        /// New body
        content: String,
    },
    /// Delete an earlier message as its author
    Delete {
        /// Index of the message
        target: usize,
    },
}

/// Strategy for generating a single chat action.
pub fn chat_action_strategy() -> impl Strategy<Value = ChatAction> {
    prop_oneof![
        4 => (any::<usize>(), content_strategy())
            .prop_map(|(author, content)| ChatAction::Send { author, content }),
        1 => (any::<usize>(), content_strategy())
            .prop_map(|(target, content)| ChatAction::Edit { target, content }),
        1 => any::<usize>().prop_map(|target| ChatAction::Delete { target }),
    ]
}

/// Strategy for generating a script of chat actions.
///
/// The script always starts with a send, so edits and deletes have a
/// target.
pub fn chat_script_strategy(max_len: usize) -> impl Strategy<Value = Vec<ChatAction>> {
    (
        content_strategy(),
        prop::collection::vec(chat_action_strategy(), 0..max_len.max(1)),
    )
        .prop_map(|(first, rest)| {
            let mut script = vec![ChatAction::Send {
                author: 0,
                content: first,
            }];
            script.extend(rest);
            script
        })
}

/// One step of membership and profile activity.
///
/// A script runs against a fixed cast: user 0 owns every conversation
/// and the others come and go. Indices are resolved modulo the number
/// of conversations or guests; steps that do not apply are skipped.
#[derive(Debug, Clone)]
pub enum MembershipAction {
    /// The owner opens a conversation with the guests whose bit is set
    Open {
        /// Bitmask over the guests
        guests: u8,
    },
    /// The owner adds a guest
    Join {
        /// Index of the conversation
        conversation: usize,
        /// Index of the guest
        guest: usize,
    },
    /// A guest leaves
    Leave {
        /// Index of the conversation
        conversation: usize,
        /// Index of the guest
        guest: usize,
    },
    /// The owner renames the conversation
    Rename {
        /// Index of the conversation
        conversation: usize,
    },
    /// The owner deletes the conversation
    Close {
        /// Index of the conversation
        conversation: usize,
    },
    /// A user edits their display name
    Profile {
        /// Index of the user, the owner included
        user: usize,
    },
}

/// Strategy for generating a single membership action.
pub fn membership_action_strategy() -> impl Strategy<Value = MembershipAction> {
    prop_oneof![
        1 => any::<u8>().prop_map(|guests| MembershipAction::Open { guests }),
        3 => (any::<usize>(), any::<usize>())
            .prop_map(|(conversation, guest)| MembershipAction::Join { conversation, guest }),
        3 => (any::<usize>(), any::<usize>())
            .prop_map(|(conversation, guest)| MembershipAction::Leave { conversation, guest }),
        2 => any::<usize>().prop_map(|conversation| MembershipAction::Rename { conversation }),
        1 => any::<usize>().prop_map(|conversation| MembershipAction::Close { conversation }),
        2 => any::<usize>().prop_map(|user| MembershipAction::Profile { user }),
    ]
}

/// Strategy for generating a membership script.
///
/// The script always opens a conversation first.
pub fn membership_script_strategy(
    max_len: usize,
) -> impl Strategy<Value = Vec<MembershipAction>> {
    (
        any::<u8>(),
        prop::collection::vec(membership_action_strategy(), 0..max_len.max(1)),
    )
        .prop_map(|(guests, rest)| {
            let mut script = vec![MembershipAction::Open { guests }];
            script.extend(rest);
            script
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn scripts_start_with_a_send() {
        let mut runner = TestRunner::default();
        for _ in 0..32 {
            let script = chat_script_strategy(8)
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(matches!(script[0], ChatAction::Send { .. }));
        }
    }

    #[test]
    fn membership_scripts_open_first() {
        let mut runner = TestRunner::default();
        for _ in 0..32 {
            let script = membership_script_strategy(8)
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(matches!(script[0], MembershipAction::Open { .. }));
        }
    }

    proptest! {
        #[test]
        fn usernames_pass_the_alphabet_rule(name in username_strategy()) {
            prop_assert!((3..=16).contains(&name.len()));
            prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }

        #[test]
        fn content_fits_the_length_rule(content in content_strategy()) {
            let len = content.chars().count();
            prop_assert!((1..=64).contains(&len));
        }
    }
}
