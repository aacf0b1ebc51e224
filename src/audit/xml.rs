//! Dumplog XML serialization (§6, §9): a small dependency-free tree
//! builder with deterministic child ordering. No `quick-xml`/`xml-rs`
//! dependency — this schema is narrow and fixed enough that the
//! teacher's approach of reaching for a crate per concern doesn't
//! apply to it (see `DESIGN.md`).

use std::fmt::Write as _;
use std::io::{self, Write};

use chrono::{DateTime, Utc};

use super::AuditEvent;

struct XmlElement {
    name: &'static str,
    text: Option<String>,
    children: Vec<XmlElement>,
}

impl XmlElement {
    fn leaf(name: &'static str, text: String) -> Self {
        Self { name, text: Some(text), children: Vec::new() }
    }

    fn parent(name: &'static str, children: Vec<XmlElement>) -> Self {
        Self { name, text: None, children }
    }

    fn write(&self, out: &mut impl Write, depth: usize) -> io::Result<()> {
        let indent = "\t".repeat(depth);
        match (&self.text, self.children.is_empty()) {
            (Some(text), _) => writeln!(out, "{indent}<{0}>{1}</{0}>", self.name, escape(text)),
            (None, true) => writeln!(out, "{indent}<{0}></{0}>", self.name),
            (None, false) => {
                writeln!(out, "{indent}<{}>", self.name)?;
                for child in &self.children {
                    child.write(out, depth + 1)?;
                }
                writeln!(out, "{indent}</{}>", self.name)
            }
        }
    }
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Field order is fixed per variant so two runs over the same events
/// produce byte-identical XML (§9: "deterministic child ordering").
fn event_fields(event: &AuditEvent) -> Vec<XmlElement> {
    let mut fields = vec![
        XmlElement::leaf("timestamp", event.timestamp.timestamp_millis().to_string()),
        XmlElement::leaf("server", event.server.clone()),
        XmlElement::leaf("transactionNum", event.transaction_num.to_string()),
    ];

    let mut push = |name: &'static str, value: Option<String>| {
        if let Some(v) = value {
            fields.push(XmlElement::leaf(name, v));
        }
    };

    push("command", event.command.map(|c| c.as_str().to_string()));
    push("username", event.username.clone());
    push("funds", event.funds.map(|d| d.to_string()));
    push("price", event.price.map(|d| d.to_string()));
    push("stockSymbol", event.stock_symbol.clone());
    push("quoteServerTime", event.quote_server_time.map(|t| t.to_string()));
    push("cryptokey", event.cryptokey.clone());
    push("action", event.action.map(|a| a.as_str().to_string()));
    push("filename", event.filename.clone());
    push("errorMessage", event.error_message.clone());
    push("debugMessage", event.debug_message.clone());

    fields
}

fn event_to_element(event: &AuditEvent) -> XmlElement {
    XmlElement::parent(event.kind.tag(), event_fields(event))
}

/// Serializes `events` as the `<log>` document described in §6 and
/// writes it to `sink`, UTF-8, tab-indented.
pub fn write_dumplog(events: &[AuditEvent], sink: &mut impl Write) -> io::Result<()> {
    let root = XmlElement::parent("log", events.iter().map(event_to_element).collect());
    root.write(sink, 0)
}

/// Renders the document to a `String` (handy for tests and for callers
/// that want to inspect it before handing it to a real sink).
pub fn render_dumplog(events: &[AuditEvent]) -> String {
    let mut buf = Vec::new();
    write_dumplog(events, &mut buf).expect("writing to an in-memory buffer cannot fail");
    String::from_utf8(buf).expect("xml output is always valid UTF-8")
}

/// §6: "The output filename is suffixed with `-YYYYMMDD-HHMMSS` of the
/// writing instant."
pub fn suffixed_filename(base: &str, at: DateTime<Utc>) -> String {
    let mut suffix = String::new();
    let _ = write!(suffix, "-{}", at.format("%Y%m%d-%H%M%S"));

    match base.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}{suffix}.{ext}"),
        None => format!("{base}{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CommandType;
    use rust_decimal_macros::dec;

    #[test]
    fn renders_one_of_each_event_kind_with_well_formed_tags() {
        let events = vec![
            AuditEvent::user_command("srv", 1, CommandType::Add, "alice"),
            AuditEvent::quote_server("srv", 2, dec!(150.00), "ABC", "alice", 1_650_000_000_000, "k1"),
            AuditEvent::account_transaction("srv", 3, super::super::AccountAction::Add, "alice", dec!(10000)),
            AuditEvent::system_event("srv", 4, CommandType::Dumplog),
            AuditEvent::error_event("srv", 5, CommandType::Buy, "insufficient cash"),
            AuditEvent::debug_event("srv", 6, CommandType::Buy, "entering handler"),
        ];

        let xml = render_dumplog(&events);
        assert!(xml.starts_with("<log>\n"));
        assert!(xml.trim_end().ends_with("</log>"));
        for tag in ["userCommand", "quoteServer", "accountTransaction", "systemEvent", "errorEvent", "debugEvent"] {
            assert!(xml.contains(&format!("<{tag}>")), "missing <{tag}> in {xml}");
            assert!(xml.contains(&format!("</{tag}>")), "missing </{tag}> in {xml}");
        }
        assert!(xml.contains("<action>add</action>"));
        assert!(xml.contains("<errorMessage>insufficient cash</errorMessage>"));
    }

    #[test]
    fn escapes_reserved_xml_characters() {
        let event = AuditEvent::error_event("srv", 1, CommandType::Buy, "a < b & c > d");
        let xml = render_dumplog(&[event]);
        assert!(xml.contains("a &lt; b &amp; c &gt; d"));
    }

    #[test]
    fn filename_gets_timestamp_suffix() {
        let at = DateTime::parse_from_rfc3339("2026-08-01T12:30:45Z").unwrap().with_timezone(&Utc);
        assert_eq!(suffixed_filename("audit.xml", at), "audit-20260801-123045.xml");
        assert_eq!(suffixed_filename("audit", at), "audit-20260801-123045");
    }
}
