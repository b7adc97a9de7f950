use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
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
    };
}

str_enum!(SyncStatus {
    Pending => "pending",
    Syncing => "syncing",
    Synced => "synced",
    Failed => "failed",
});

str_enum!(Eye {
    Right => "right",
    Left => "left",
});

str_enum!(Locale {
    En => "en",
    Ha => "ha",
});

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Right, Eye::Left];

    pub fn other(&self) -> Eye {
        match self {
            Self::Right => Self::Left,
            Self::Left => Self::Right,
        }
    }
}

impl SyncStatus {
    /// `synced` is terminal; every other status may be rewritten by the reconciler.
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        match self {
            Self::Synced => next == Self::Synced,
            _ => true,
        }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::En
    }
}
