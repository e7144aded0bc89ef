//! Property-based test generators using proptest.

use crate::fixtures::Files;
use proptest::prelude::*;
use reposync_core::ObjectId;

/// Strategy for arbitrary object ids.
pub fn object_id_strategy() -> impl Strategy<Value = ObjectId> {
    prop::collection::vec(any::<u8>(), 0..64).prop_map(|bytes| ObjectId::of(&bytes))
}

/// Strategy for block payloads, empty included.
pub fn block_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

/// Strategy for valid branch names.
pub fn branch_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_.-]{0,23}").expect("Invalid regex")
}

/// Strategy for small file trees up to three levels deep.
///
/// Paths never collide with a directory of the same name: files sit at
/// `f*` names and directories at `d*` names.
pub fn files_strategy() -> impl Strategy<Value = Files> {
    let path = prop::string::string_regex("(d[0-3]/){0,2}f[0-5]").expect("Invalid regex");
    let content = prop::collection::vec(any::<u8>(), 0..300);
    prop::collection::btree_map(path, content, 0..12)
}

/// Strategy for a history of trees, each one a commit on a branch.
pub fn history_strategy(max_commits: usize) -> impl Strategy<Value = Vec<Files>> {
    prop::collection::vec(files_strategy(), 1..=max_commits.max(1))
}
