//! Tabular export of aggregated users.

use crate::aggregate::UserRecord;

/// Column headers, in output order.
pub const COLUMNS: [&str; 6] = ["Name", "Phone", "Email", "ID", "Role", "Location"];

/// Renders a finished user set into a downloadable artifact.
pub trait ExportSink: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn file_extension(&self) -> &'static str;

    fn render(&self, users: &[UserRecord], columns: &[&str]) -> Vec<u8>;
}

/// RFC 4180 CSV with CRLF line endings.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvExport;

impl ExportSink for CsvExport {
    fn content_type(&self) -> &'static str {
        "text/csv; charset=utf-8"
    }

    fn file_extension(&self) -> &'static str {
        "csv"
    }

    fn render(&self, users: &[UserRecord], columns: &[&str]) -> Vec<u8> {
        let mut out = String::new();
        push_row(&mut out, columns.iter().map(|c| c.to_string()));
        for user in users {
            push_row(&mut out, columns.iter().map(|c| cell(user, c)));
        }
        out.into_bytes()
    }
}

fn cell(user: &UserRecord, column: &str) -> String {
    let joined = |set: &std::collections::BTreeSet<String>| {
        set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
    };
    match column {
        "Name" => user.name.clone(),
        "Phone" => user.phone.clone(),
        "Email" => user.email.clone(),
        "ID" => user.id.clone(),
        "Role" => joined(&user.roles),
        "Location" => joined(&user.location_ids),
        _ => String::new(),
    }
}

fn push_row(out: &mut String, fields: impl Iterator<Item = String>) {
    let row: Vec<String> = fields.map(|f| escape(&f)).collect();
    out.push_str(&row.join(","));
    out.push_str("\r\n");
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
