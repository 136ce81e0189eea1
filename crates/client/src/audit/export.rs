//! CSV and JSON export of the audit buffer.

use std::io::Write;

use autopro_core::{AuditLogEntry, Permission};
use chrono::{DateTime, SecondsFormat, Utc};

use super::{AuditError, AuditLogger, AuditQuery};

/// Permission required to export audit entries.
pub const EXPORT_PERMISSION: Permission = Permission::ReadAnalytics;

const CSV_HEADER: [&str; 5] = ["Date", "User", "Action", "Level", "IP"];

/// Export file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
        }
    }

    /// Download name for an export taken at `now_ms`.
    #[must_use]
    pub fn file_name(self, now_ms: i64) -> String {
        let stamp = DateTime::<Utc>::from_timestamp_millis(now_ms).map_or_else(
            || now_ms.to_string(),
            |dt| dt.format("%Y%m%dT%H%M%SZ").to_string(),
        );
        format!("audit_logs_{stamp}.{}", self.extension())
    }
}

impl AuditLogger {
    /// Export entries matching `query` as a string.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::PermissionDenied` unless the current user holds
    /// `read:analytics`, or an encoding error.
    pub fn export(&self, format: ExportFormat, query: &AuditQuery) -> Result<String, AuditError> {
        let mut buf = Vec::new();
        self.export_to(format, query, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Export entries matching `query` into `out`.
    ///
    /// # Errors
    ///
    /// See [`AuditLogger::export`]. Also fails if `out` cannot be written.
    pub fn export_to<W: Write>(
        &self,
        format: ExportFormat,
        query: &AuditQuery,
        out: W,
    ) -> Result<(), AuditError> {
        if !self.auth().has_permission(EXPORT_PERMISSION) {
            return Err(AuditError::PermissionDenied(EXPORT_PERMISSION));
        }

        let entries = self.query(query);
        match format {
            ExportFormat::Csv => write_csv(&entries, out),
            ExportFormat::Json => {
                serde_json::to_writer_pretty(out, &entries)?;
                Ok(())
            }
        }
    }
}

fn write_csv<W: Write>(entries: &[AuditLogEntry], out: W) -> Result<(), AuditError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);

    writer.write_record(CSV_HEADER)?;
    for entry in entries {
        writer.write_record([
            format_timestamp(entry.timestamp).as_str(),
            entry.user_name.as_str(),
            entry.action.as_str(),
            entry.level.as_str(),
            entry.ip.as_deref().unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// RFC 3339 UTC with milliseconds; out-of-range values fall back to the raw number.
fn format_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms).map_or_else(
        || ms.to_string(),
        |dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use autopro_core::{AuditLevel, AuthUser, ManualClock, Role, Session};
    use serde_json::Value;

    use super::*;
    use crate::auth::{AuthStore, MemoryStorage};

    const NOW: i64 = 1_700_000_000_000;

    fn logger_as(user: Option<AuthUser>) -> AuditLogger {
        let auth = AuthStore::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(NOW)),
        );
        if let Some(user) = user {
            auth.save_session(&Session::new("a", "r", NOW + 60_000), &user)
                .expect("save");
        }
        AuditLogger::build(auth, 100, None, Some("127.0.0.1".to_string()))
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            ExportFormat::Csv.file_name(NOW),
            "audit_logs_20231114T221320Z.csv"
        );
        assert!(!ExportFormat::Json.file_name(NOW).contains(':'));
        assert_eq!(ExportFormat::Json.extension(), "json");
    }

    #[test]
    fn test_export_requires_permission() {
        for user in [None, Some(AuthUser::new("2", "Ivan", Role::User))] {
            let logger = logger_as(user);
            logger.info("x", None, None);

            let err = logger
                .export(ExportFormat::Csv, &AuditQuery::all())
                .expect_err("should be denied");
            assert!(matches!(err, AuditError::PermissionDenied(Permission::ReadAnalytics)));
        }
    }

    #[test]
    fn test_explicit_grant_allows_export() {
        let logger = logger_as(Some(
            AuthUser::new("3", "Analyst", Role::User).with_permission(Permission::ReadAnalytics),
        ));
        assert!(logger.export(ExportFormat::Json, &AuditQuery::all()).is_ok());
    }

    #[test]
    fn test_csv_export() {
        let logger = logger_as(Some(AuthUser::new("1", "Admin", Role::Admin)));
        logger.admin_action("Changed tariff, weekend", Some("settings"), None);
        logger.info("Viewed report", None, None);

        let csv = logger
            .export(ExportFormat::Csv, &AuditQuery::all())
            .expect("export");
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "Date,User,Action,Level,IP");
        assert_eq!(lines[1], "2023-11-14T22:13:20.000Z,Admin,Viewed report,INFO,127.0.0.1");
        assert_eq!(
            lines[2],
            "2023-11-14T22:13:20.000Z,Admin,\"Changed tariff, weekend\",WARNING,127.0.0.1"
        );
    }

    #[test]
    fn test_json_export_respects_query() {
        let logger = logger_as(Some(AuthUser::new("1", "Admin", Role::Admin)));
        logger.error("Timeout", Some("/cars"), None);
        logger.info("Viewed report", None, None);

        let json = logger
            .export(
                ExportFormat::Json,
                &AuditQuery::default().level(AuditLevel::Error),
            )
            .expect("export");
        let value: Value = serde_json::from_str(&json).expect("valid json");

        let entries = value.as_array().expect("array");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["eventType"], "API_ERROR");
        assert_eq!(entries[0]["target"], "/cars");
    }
}
