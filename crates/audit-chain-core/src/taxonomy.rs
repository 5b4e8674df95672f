//! The closed event taxonomy.
//!
//! Every audit entry is tagged with exactly one value from each vocabulary
//! below. Values carry a stable wire name (used in canonical bytes, storage
//! and exports) and the schema version they were introduced in. Adding a
//! value means bumping [`TAXONOMY_SCHEMA_VERSION`]; existing entries keep the
//! version they were written with.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::MalformedEventError;

/// The schema version of the taxonomy and canonical encoding.
pub const TAXONOMY_SCHEMA_VERSION: u16 = 1;

macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident as $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal @ $since:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
        }

        impl $name {
            /// Every value of this vocabulary, in declaration order.
            pub const ALL: &'static [Self] = &[ $( Self::$variant, )+ ];

            /// The stable wire name.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $wire, )+
                }
            }

            /// Parse a wire name, rejecting anything outside the vocabulary.
            pub fn parse(value: &str) -> Result<Self, MalformedEventError> {
                match value {
                    $( $wire => Ok(Self::$variant), )+
                    other => Err(MalformedEventError::UnknownValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }

            /// The schema version this value was introduced in.
            pub fn since_schema(self) -> u16 {
                match self {
                    $( Self::$variant => $since, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = MalformedEventError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                Self::parse(&value).map_err(serde::de::Error::custom)
            }
        }
    };
}

vocabulary! {
    /// Top-level audit category.
    Category as "category" {
        DataProcessing => "data_processing" @ 1,
        ConsentManagement => "consent_management" @ 1,
        BreachResponse => "breach_response" @ 1,
        SystemAccess => "system_access" @ 1,
        ComplianceMonitoring => "compliance_monitoring" @ 1,
        AdministrativeAction => "administrative_action" @ 1,
        AutomatedProcess => "automated_process" @ 1,
    }
}

vocabulary! {
    /// The regulated action that was performed. Each action belongs to
    /// exactly one [`Category`].
    Action as "action" {
        // data_processing
        DataCreated => "data_created" @ 1,
        DataAccessed => "data_accessed" @ 1,
        DataUpdated => "data_updated" @ 1,
        DataDeleted => "data_deleted" @ 1,
        DataExported => "data_exported" @ 1,
        DataAnonymized => "data_anonymized" @ 1,
        DataTransferred => "data_transferred" @ 1,
        DataRectified => "data_rectified" @ 1,

        // consent_management
        ConsentGranted => "consent_granted" @ 1,
        ConsentWithdrawn => "consent_withdrawn" @ 1,
        ConsentUpdated => "consent_updated" @ 1,
        ConsentExpired => "consent_expired" @ 1,
        ConsentRenewed => "consent_renewed" @ 1,

        // breach_response
        BreachDetected => "breach_detected" @ 1,
        BreachAssessed => "breach_assessed" @ 1,
        BreachContained => "breach_contained" @ 1,
        AuthorityNotified => "authority_notified" @ 1,
        SubjectsNotified => "subjects_notified" @ 1,
        BreachClosed => "breach_closed" @ 1,

        // system_access
        LoginSucceeded => "login_succeeded" @ 1,
        LoginFailed => "login_failed" @ 1,
        Logout => "logout" @ 1,
        PrivilegedAccess => "privileged_access" @ 1,
        PermissionChanged => "permission_changed" @ 1,
        AccessDenied => "access_denied" @ 1,
        ApiKeyUsed => "api_key_used" @ 1,

        // compliance_monitoring
        RightsRequestReceived => "rights_request_received" @ 1,
        RightsRequestFulfilled => "rights_request_fulfilled" @ 1,
        RightsRequestRejected => "rights_request_rejected" @ 1,
        PolicyReviewed => "policy_reviewed" @ 1,
        AssessmentCompleted => "assessment_completed" @ 1,
        RetentionEnforced => "retention_enforced" @ 1,
        ChainVerified => "chain_verified" @ 1,

        // administrative_action
        UserCreated => "user_created" @ 1,
        UserDeactivated => "user_deactivated" @ 1,
        RoleAssigned => "role_assigned" @ 1,
        ConfigurationChanged => "configuration_changed" @ 1,
        RecordCorrected => "record_corrected" @ 1,
        TenantSettingsChanged => "tenant_settings_changed" @ 1,

        // automated_process
        ScheduledJobRun => "scheduled_job_run" @ 1,
        DataPurged => "data_purged" @ 1,
        ReportGenerated => "report_generated" @ 1,
        ExportGenerated => "export_generated" @ 1,
        NotificationDispatched => "notification_dispatched" @ 1,
    }
}

vocabulary! {
    /// The kind of resource an action was performed on.
    Resource as "resource" {
        User => "user" @ 1,
        Organization => "organization" @ 1,
        DataSubject => "data_subject" @ 1,
        ConsentRecord => "consent_record" @ 1,
        RightsRequest => "rights_request" @ 1,
        BreachIncident => "breach_incident" @ 1,
        ProcessingActivity => "processing_activity" @ 1,
        Document => "document" @ 1,
        Course => "course" @ 1,
        Certificate => "certificate" @ 1,
        Session => "session" @ 1,
        ApiKey => "api_key" @ 1,
        SystemSetting => "system_setting" @ 1,
        AuditChain => "audit_chain" @ 1,
        Report => "report" @ 1,
    }
}

vocabulary! {
    /// How serious an event is, for filtering and alerting.
    Severity as "severity" {
        Info => "info" @ 1,
        Low => "low" @ 1,
        Medium => "medium" @ 1,
        High => "high" @ 1,
        Critical => "critical" @ 1,
    }
}

vocabulary! {
    /// How the action ended.
    Outcome as "outcome" {
        Success => "success" @ 1,
        Failure => "failure" @ 1,
        Partial => "partial" @ 1,
        Pending => "pending" @ 1,
        Cancelled => "cancelled" @ 1,
        Error => "error" @ 1,
    }
}

impl Action {
    /// The category this action belongs to.
    pub fn category(self) -> Category {
        use Action::*;
        match self {
            DataCreated | DataAccessed | DataUpdated | DataDeleted | DataExported
            | DataAnonymized | DataTransferred | DataRectified => Category::DataProcessing,

            ConsentGranted | ConsentWithdrawn | ConsentUpdated | ConsentExpired
            | ConsentRenewed => Category::ConsentManagement,

            BreachDetected | BreachAssessed | BreachContained | AuthorityNotified
            | SubjectsNotified | BreachClosed => Category::BreachResponse,

            LoginSucceeded | LoginFailed | Logout | PrivilegedAccess | PermissionChanged
            | AccessDenied | ApiKeyUsed => Category::SystemAccess,

            RightsRequestReceived | RightsRequestFulfilled | RightsRequestRejected
            | PolicyReviewed | AssessmentCompleted | RetentionEnforced | ChainVerified => {
                Category::ComplianceMonitoring
            }

            UserCreated | UserDeactivated | RoleAssigned | ConfigurationChanged
            | RecordCorrected | TenantSettingsChanged => Category::AdministrativeAction,

            ScheduledJobRun | DataPurged | ReportGenerated | ExportGenerated
            | NotificationDispatched => Category::AutomatedProcess,
        }
    }
}

impl Category {
    /// All actions that belong to this category.
    pub fn actions(self) -> impl Iterator<Item = Action> {
        Action::ALL.iter().copied().filter(move |a| a.category() == self)
    }
}

impl Severity {
    /// Whether an event at this severity should raise an alert.
    pub fn is_alerting(self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}
