//! Statement text for the receiver table.

use crate::message::Message;

pub const TABLE: &str = "receiver_table";

/// Column names in storage order.
pub const COLUMNS: [&str; Message::COLUMN_COUNT] =
    ["receiver_id", "ts", "msg_id", "group_id", "msg", "sender_id"];

/// Quotes `value` as a string literal, doubling embedded quotes.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

pub fn insert(message: &Message) -> String {
    let values: Vec<String> = message.values().iter().map(|v| quote(v)).collect();
    format!(
        "INSERT INTO {TABLE}({}) VALUES({});",
        COLUMNS.join(", "),
        values.join(", ")
    )
}

pub fn select_by_receiver(receiver_id: &str) -> String {
    format!("SELECT * FROM {TABLE} WHERE receiver_id = {};", quote(receiver_id))
}
