// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Data type descriptor table.
//!
//! Every synchronized data type is described by a [`DataTypeDescriptor`]:
//! which owner kind it belongs to, how its natural key is extracted, which
//! reconciliation policy applies, how the remote side paginates it, and which
//! other types must have finished before it is meaningful. The reconciliation
//! and scheduling code is generic over this table.
//!
//! # Example
//!
//! ```
//! use history_sync::{DataType, ReconcilePolicy, FetchShape};
//! use serde_json::json;
//!
//! let journal = DataType::WalletJournal.descriptor();
//! assert_eq!(journal.policy, ReconcilePolicy::AppendOnly);
//! assert_eq!(journal.fetch, FetchShape::Cursor { id_field: "ref_id" });
//!
//! let bids = DataType::ContractBids.descriptor();
//! let key = bids.natural_key(&json!({"contract_id": 77, "bid_id": 3, "amount": 5.5})).unwrap();
//! assert_eq!(key, "77:3");
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Which kind of owner a data type is synchronized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Character,
    Corporation,
}

/// How a fresh snapshot is reconciled against stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// The snapshot is the complete current state: update, insert, soft-delete.
    FullSyncReplace,
    /// Immutable events: only keys not yet stored are inserted.
    AppendOnly,
}

/// How the remote side delivers a complete snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchShape {
    /// One call returns everything
    Single,
    /// Page 1 reports the total page count; pages are fetched 1..=N
    Paged,
    /// Walk backwards from "infinity" using the smallest `id_field` seen,
    /// until an empty page comes back
    Cursor { id_field: &'static str },
}

/// Natural key extraction failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeyError {
    #[error("record for {data_type} is missing key field '{field}'")]
    MissingField { data_type: DataType, field: &'static str },
    #[error("record for {data_type} has non-scalar key field '{field}'")]
    NonScalar { data_type: DataType, field: &'static str },
}

/// Static description of one data type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataTypeDescriptor {
    pub data_type: DataType,
    pub owner_kind: OwnerKind,
    pub policy: ReconcilePolicy,
    pub fetch: FetchShape,
    /// Payload fields forming the natural key, in order
    pub key_fields: &'static [&'static str],
    /// Types whose latest cycle must have finished before this one runs
    pub prerequisites: &'static [DataType],
    /// Decimal places floats are rounded to before comparison
    pub float_decimals: Option<u32>,
}

impl DataTypeDescriptor {
    /// Render the natural key of `payload` as `part[:part...]`.
    pub fn natural_key(&self, payload: &Value) -> Result<String, KeyError> {
        let mut parts = Vec::with_capacity(self.key_fields.len());
        for field in self.key_fields {
            let part = match payload.get(*field) {
                None | Some(Value::Null) => {
                    return Err(KeyError::MissingField {
                        data_type: self.data_type,
                        field,
                    })
                }
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                Some(_) => {
                    return Err(KeyError::NonScalar {
                        data_type: self.data_type,
                        field,
                    })
                }
            };
            parts.push(part);
        }
        Ok(parts.join(":"))
    }
}

macro_rules! data_types {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Every synchronized data type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum DataType {
            $($variant),+
        }

        impl DataType {
            /// All data types in declaration order.
            pub const ALL: &'static [DataType] = &[$(DataType::$variant),+];

            /// Stable snake_case name used in storage and logs.
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(DataType::$variant => $name),+
                }
            }
        }

        impl FromStr for DataType {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(DataType::$variant),)+
                    other => Err(format!("unknown data type '{}'", other)),
                }
            }
        }
    };
}

data_types! {
    // Character
    CharacterSheet => "character_sheet",
    CharacterRoles => "character_roles",
    CharacterTitles => "character_titles",
    CharacterLocation => "character_location",
    CharacterShip => "character_ship",
    CharacterOnline => "character_online",
    CharacterFatigue => "character_fatigue",
    Attributes => "attributes",
    Skills => "skills",
    SkillQueue => "skill_queue",
    Implants => "implants",
    JumpClones => "jump_clones",
    Contacts => "contacts",
    ContactLabels => "contact_labels",
    Standings => "standings",
    Blueprints => "blueprints",
    Assets => "assets",
    WalletBalance => "wallet_balance",
    WalletJournal => "wallet_journal",
    WalletTransactions => "wallet_transactions",
    MarketOrders => "market_orders",
    IndustryJobs => "industry_jobs",
    Contracts => "contracts",
    ContractItems => "contract_items",
    ContractBids => "contract_bids",
    CalendarEvents => "calendar_events",
    CalendarEventAttendees => "calendar_event_attendees",
    Notifications => "notifications",
    MailHeaders => "mail_headers",
    MailLabels => "mail_labels",
    MailingLists => "mailing_lists",
    Medals => "medals",
    Opportunities => "opportunities",
    MiningLedger => "mining_ledger",
    KillMails => "kill_mails",
    ResearchAgents => "research_agents",
    LoyaltyPoints => "loyalty_points",
    PlanetaryColonies => "planetary_colonies",
    Fittings => "fittings",
    Bookmarks => "bookmarks",
    CorporationHistory => "corporation_history",
    // Corporation
    CorporationSheet => "corporation_sheet",
    CorporationDivisions => "corporation_divisions",
    CorporationMembers => "corporation_members",
    MemberTracking => "member_tracking",
    CorporationTitles => "corporation_titles",
    MemberTitles => "member_titles",
    CorporationStructures => "corporation_structures",
    Starbases => "starbases",
    Facilities => "facilities",
    Shareholders => "shareholders",
    ContainerLogs => "container_logs",
    CorporationWalletJournal => "corporation_wallet_journal",
    CorporationAssets => "corporation_assets",
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const ISK: Option<u32> = Some(2);

impl DataType {
    /// Descriptor for this type.
    #[must_use]
    pub fn descriptor(self) -> DataTypeDescriptor {
        use DataType::*;
        use FetchShape::*;
        use OwnerKind::*;
        use ReconcilePolicy::*;

        let d = |owner_kind, policy, fetch, key_fields, prerequisites, float_decimals| {
            DataTypeDescriptor {
                data_type: self,
                owner_kind,
                policy,
                fetch,
                key_fields,
                prerequisites,
                float_decimals,
            }
        };

        match self {
            CharacterSheet => d(Character, FullSyncReplace, Single, &["character_id"], &[], ISK),
            CharacterRoles => d(Character, FullSyncReplace, Single, &["role_category", "role_name"], &[], None),
            CharacterTitles => d(Character, FullSyncReplace, Single, &["title_id"], &[], None),
            CharacterLocation => d(Character, FullSyncReplace, Single, &["character_id"], &[], None),
            CharacterShip => d(Character, FullSyncReplace, Single, &["character_id"], &[], None),
            CharacterOnline => d(Character, FullSyncReplace, Single, &["character_id"], &[], None),
            CharacterFatigue => d(Character, FullSyncReplace, Single, &["character_id"], &[], None),
            Attributes => d(Character, FullSyncReplace, Single, &["character_id"], &[], None),
            Skills => d(Character, FullSyncReplace, Single, &["skill_id"], &[], None),
            SkillQueue => d(Character, FullSyncReplace, Single, &["queue_position"], &[], None),
            Implants => d(Character, FullSyncReplace, Single, &["type_id"], &[], None),
            JumpClones => d(Character, FullSyncReplace, Single, &["jump_clone_id"], &[], None),
            Contacts => d(Character, FullSyncReplace, Paged, &["contact_id"], &[], ISK),
            ContactLabels => d(Character, FullSyncReplace, Single, &["label_id"], &[], None),
            Standings => d(Character, FullSyncReplace, Single, &["from_type", "from_id"], &[], ISK),
            Blueprints => d(Character, FullSyncReplace, Paged, &["item_id"], &[], None),
            Assets => d(Character, FullSyncReplace, Paged, &["item_id"], &[], None),
            WalletBalance => d(Character, FullSyncReplace, Single, &["division"], &[], ISK),
            WalletJournal => d(Character, AppendOnly, Cursor { id_field: "ref_id" }, &["ref_id"], &[], ISK),
            WalletTransactions => d(
                Character,
                AppendOnly,
                Cursor { id_field: "transaction_id" },
                &["transaction_id"],
                &[],
                ISK,
            ),
            MarketOrders => d(Character, FullSyncReplace, Single, &["order_id"], &[], ISK),
            IndustryJobs => d(Character, FullSyncReplace, Single, &["job_id"], &[], ISK),
            Contracts => d(Character, FullSyncReplace, Paged, &["contract_id"], &[], ISK),
            ContractItems => d(
                Character,
                FullSyncReplace,
                Single,
                &["contract_id", "record_id"],
                &[Contracts],
                None,
            ),
            ContractBids => d(
                Character,
                FullSyncReplace,
                Single,
                &["contract_id", "bid_id"],
                &[Contracts],
                ISK,
            ),
            CalendarEvents => d(Character, FullSyncReplace, Single, &["event_id"], &[], None),
            CalendarEventAttendees => d(
                Character,
                FullSyncReplace,
                Single,
                &["event_id", "character_id"],
                &[CalendarEvents, CharacterSheet],
                None,
            ),
            Notifications => d(Character, AppendOnly, Single, &["notification_id"], &[], None),
            MailHeaders => d(Character, AppendOnly, Cursor { id_field: "mail_id" }, &["mail_id"], &[], None),
            MailLabels => d(Character, FullSyncReplace, Single, &["label_id"], &[], None),
            MailingLists => d(Character, FullSyncReplace, Single, &["mailing_list_id"], &[], None),
            // The same medal can be awarded more than once
            Medals => d(Character, AppendOnly, Single, &["medal_id", "issued"], &[], None),
            Opportunities => d(Character, AppendOnly, Single, &["task_id", "completed_at"], &[], None),
            MiningLedger => d(
                Character,
                AppendOnly,
                Paged,
                &["date", "solar_system_id", "type_id"],
                &[],
                None,
            ),
            KillMails => d(Character, AppendOnly, Paged, &["killmail_id"], &[], None),
            ResearchAgents => d(Character, FullSyncReplace, Single, &["agent_id"], &[], ISK),
            LoyaltyPoints => d(Character, FullSyncReplace, Single, &["corporation_id"], &[], None),
            PlanetaryColonies => d(Character, FullSyncReplace, Single, &["planet_id"], &[], None),
            Fittings => d(Character, FullSyncReplace, Single, &["fitting_id"], &[], None),
            Bookmarks => d(Character, FullSyncReplace, Paged, &["bookmark_id"], &[], None),
            CorporationHistory => d(Character, AppendOnly, Single, &["record_id"], &[], None),

            CorporationSheet => d(Corporation, FullSyncReplace, Single, &["corporation_id"], &[], ISK),
            CorporationDivisions => d(Corporation, FullSyncReplace, Single, &["wallet", "division"], &[], None),
            CorporationMembers => d(Corporation, FullSyncReplace, Single, &["character_id"], &[], None),
            MemberTracking => d(
                Corporation,
                FullSyncReplace,
                Single,
                &["character_id"],
                &[CorporationMembers],
                None,
            ),
            CorporationTitles => d(Corporation, FullSyncReplace, Single, &["title_id"], &[], None),
            MemberTitles => d(
                Corporation,
                FullSyncReplace,
                Single,
                &["character_id", "title_id"],
                &[CorporationMembers, CorporationTitles],
                None,
            ),
            CorporationStructures => d(Corporation, FullSyncReplace, Paged, &["structure_id"], &[], None),
            Starbases => d(Corporation, FullSyncReplace, Paged, &["starbase_id"], &[], None),
            Facilities => d(Corporation, FullSyncReplace, Single, &["facility_id"], &[], None),
            Shareholders => d(Corporation, FullSyncReplace, Paged, &["shareholder_id"], &[], None),
            ContainerLogs => d(
                Corporation,
                AppendOnly,
                Paged,
                &["logged_at", "container_id", "character_id", "action"],
                &[],
                None,
            ),
            CorporationWalletJournal => d(
                Corporation,
                AppendOnly,
                Cursor { id_field: "ref_id" },
                &["division", "ref_id"],
                &[],
                ISK,
            ),
            CorporationAssets => d(Corporation, FullSyncReplace, Paged, &["item_id"], &[], None),
        }
    }

    /// The owner kind this type is synchronized for.
    #[must_use]
    pub fn owner_kind(self) -> OwnerKind {
        self.descriptor().owner_kind
    }

    /// Every data type synchronized for `kind`.
    pub fn for_owner_kind(kind: OwnerKind) -> impl Iterator<Item = DataType> {
        Self::ALL
            .iter()
            .copied()
            .filter(move |dt| dt.owner_kind() == kind)
    }
}
