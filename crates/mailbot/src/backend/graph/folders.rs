//! Well-known folder names.

use crate::error::{Error, Result};

/// Logical aliases and their Graph well-known folder ids.
const WELL_KNOWN: &[(&str, &str)] = &[
    ("inbox", "inbox"),
    ("sent", "sentitems"),
    ("trash", "deleteditems"),
    ("drafts", "drafts"),
];

/// Maps `inbox`, `sent`, `trash` and `drafts` (any case) to Graph folder
/// ids. Other names are returned unchanged.
///
/// # Errors
///
/// Returns [`Error::Config`] for an empty name.
pub fn normalize_folder_name(folder: &str) -> Result<String> {
    if folder.trim().is_empty() {
        return Err(Error::Config("folder name is required".into()));
    }
    Ok(WELL_KNOWN
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(folder))
        .map_or_else(|| folder.to_string(), |(_, id)| (*id).to_string()))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_aliases() {
        for name in ["INBOX", "Inbox", "inbox"] {
            assert_eq!(normalize_folder_name(name).unwrap(), "inbox");
        }
        assert_eq!(normalize_folder_name("Sent").unwrap(), "sentitems");
        assert_eq!(normalize_folder_name("TRASH").unwrap(), "deleteditems");
        assert_eq!(normalize_folder_name("drafts").unwrap(), "drafts");
    }

    #[test]
    fn test_empty_name() {
        assert!(matches!(normalize_folder_name(" "), Err(Error::Config(_))));
    }

    proptest! {
        #[test]
        fn alias_mapping_ignores_case(index in 0usize..4, upper in proptest::collection::vec(any::<bool>(), 6)) {
            let (alias, id) = WELL_KNOWN[index];
            let mixed: String = alias
                .chars()
                .zip(upper.iter().cycle())
                .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
                .collect();
            prop_assert_eq!(normalize_folder_name(&mixed).unwrap(), id);
        }

        #[test]
        fn unknown_names_pass_through(name in "[A-Za-z0-9 _-]{1,24}") {
            prop_assume!(!name.trim().is_empty());
            prop_assume!(!WELL_KNOWN.iter().any(|(alias, _)| alias.eq_ignore_ascii_case(&name)));
            prop_assert_eq!(normalize_folder_name(&name).unwrap(), name);
        }
    }
}
