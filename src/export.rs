use crate::models::UserDto;

const HEADER: [&str; 8] = [
    "Username",
    "Nick name",
    "Email",
    "Phone",
    "Gender",
    "Department",
    "Enabled",
    "Created at",
];

/// Renders users as CSV (RFC 4180 quoting, CRLF line ends, header row first).
pub fn users_to_csv(users: &[UserDto]) -> String {
    let mut out = String::new();
    push_row(&mut out, HEADER.iter().map(|h| h.to_string()));

    for user in users {
        push_row(
            &mut out,
            [
                user.username.clone(),
                user.nick_name.clone(),
                user.email.clone(),
                user.phone.clone().unwrap_or_default(),
                user.gender.clone().unwrap_or_default(),
                user.dept_id.map(|d| d.to_string()).unwrap_or_default(),
                if user.enabled { "enabled" } else { "disabled" }.to_string(),
                user.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ],
        );
    }
    out
}

fn push_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    let row: Vec<String> = fields.into_iter().map(|f| escape(&f)).collect();
    out.push_str(&row.join(","));
    out.push_str("\r\n");
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
