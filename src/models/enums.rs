use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(
    /// Store-wide case policy for terms and ATC codes.
    CasePolicy {
        Preserve => "preserve",
        /// Lowercase composition terms, excipient terms and ATC codes.
        /// Attribute text keeps its case.
        Lower => "lower",
    }
);

str_enum!(
    /// How forbidden excipients filter composition search results.
    ExclusionPolicy {
        /// Drop individual rows carrying a forbidden excipient; a drug survives
        /// while at least one matching row survives.
        RowSurvival => "row_survival",
        /// Drop the whole drug as soon as one matching row carries a forbidden
        /// excipient.
        WholeDrugVeto => "whole_drug_veto",
    }
);

str_enum!(
    /// How `update_drug` writes a recomputed cross product.
    UpdatePolicy {
        /// Upsert new keys only. Entries for dropped terms stay behind.
        Upsert => "upsert",
        /// Delete every entry of the drug, then insert the new cross product.
        Replace => "replace",
    }
);

impl Default for CasePolicy {
    fn default() -> Self {
        Self::Preserve
    }
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self::RowSurvival
    }
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self::Upsert
    }
}
