//! 消息能力工具集（本地邮箱：收件箱 / 发件箱 / 标签）
//!
//! 收件人可以直接给名字：按联系人规则拼出地址（名的首字母 + 最后一个姓，去重音、小写，@域名）。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::tools::json_store::JsonStore;
use crate::tools::{optional_bool, optional_str, optional_u64, required_str, Tool, ToolRegistry};

pub const LABEL_INBOX: &str = "INBOX";
pub const LABEL_SENT: &str = "SENT";
pub const LABEL_TRASH: &str = "TRASH";
pub const LABEL_UNREAD: &str = "UNREAD";

const DEFAULT_LIST_MAX: u64 = 10;

/// 去掉常见拉丁字母的重音符号
fn fold_ascii(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// 名字 -> 邮箱地址；已含 @ 的输入原样返回
///
/// "Juan Pérez" -> "jperez@domain"；单个词时直接用该词。
pub fn contact_address(name: &str, domain: &str) -> Result<String, String> {
    let name = name.trim();
    if name.contains('@') {
        return Ok(name.to_string());
    }
    let words: Vec<String> = name
        .split_whitespace()
        .map(|w| {
            w.to_lowercase()
                .chars()
                .map(fold_ascii)
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect();
    let local = match words.as_slice() {
        [] => return Err(format!("Cannot build an address from '{}'", name)),
        [only] => only.clone(),
        [first, .., last] => format!("{}{}", &first[..1], last),
    };
    Ok(format!("{}@{}", local, domain.trim_start_matches('@')))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub date: DateTime<Local>,
}

impl MailMessage {
    fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }

    fn headline(&self) -> String {
        let unread = if self.has_label(LABEL_UNREAD) { " [unread]" } else { "" };
        format!(
            "- {} | from {} to {} | {}{} (id: {})",
            self.date.format("%Y-%m-%d %H:%M"),
            self.from,
            self.to.join(", "),
            self.subject,
            unread,
            self.id
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Mailbox {
    #[serde(default)]
    pub messages: Vec<MailMessage>,
}

impl Mailbox {
    fn find(&self, id: &str) -> Result<usize, String> {
        let id = id.trim();
        self.messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| format!("Message '{}' not found", id))
    }
}

pub type MailStore = JsonStore<Mailbox>;

/// 发件人与联系人域名
#[derive(Debug, Clone)]
pub struct MailIdentity {
    pub sender: String,
    pub contact_domain: String,
}

impl MailIdentity {
    fn resolve_all(&self, to: &Value) -> Result<Vec<String>, String> {
        let names: Vec<String> = match to {
            Value::String(s) => s.split([',', ';']).map(String::from).collect(),
            Value::Array(a) => a.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
            _ => Vec::new(),
        };
        let addrs = names
            .iter()
            .filter(|n| !n.trim().is_empty())
            .map(|n| contact_address(n, &self.contact_domain))
            .collect::<Result<Vec<_>, _>>()?;
        if addrs.is_empty() {
            return Err("Missing recipient 'to'".to_string());
        }
        Ok(addrs)
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

pub struct ListMessagesTool {
    store: Arc<MailStore>,
}

#[async_trait]
impl Tool for ListMessagesTool {
    fn name(&self) -> &str {
        "list_messages"
    }

    fn description(&self) -> &str {
        "List messages, newest first. Args: {\"label\": \"INBOX|SENT|TRASH|UNREAD, default INBOX\", \"query\": \"optional text\", \"max_results\": 10}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let label = optional_str(&args, "label").unwrap_or(LABEL_INBOX).to_string();
        let query = optional_str(&args, "query").map(|q| q.to_lowercase());
        let max = optional_u64(&args, "max_results").unwrap_or(DEFAULT_LIST_MAX) as usize;
        Ok(self.store.read(|mb| {
            let mut hits: Vec<&MailMessage> = mb
                .messages
                .iter()
                .filter(|m| m.has_label(&label))
                .filter(|m| match &query {
                    Some(q) => {
                        m.subject.to_lowercase().contains(q)
                            || m.body.to_lowercase().contains(q)
                            || m.from.to_lowercase().contains(q)
                    }
                    None => true,
                })
                .collect();
            hits.sort_by(|a, b| b.date.cmp(&a.date));
            hits.truncate(max);
            if hits.is_empty() {
                format!("No messages in {}.", label)
            } else {
                let lines: Vec<String> = hits.iter().map(|m| m.headline()).collect();
                format!("Messages in {}:\n{}", label, lines.join("\n"))
            }
        }))
    }
}

pub struct GetMessageTool {
    store: Arc<MailStore>,
}

#[async_trait]
impl Tool for GetMessageTool {
    fn name(&self) -> &str {
        "get_message"
    }

    fn description(&self) -> &str {
        "Read a full message and mark it read. Args: {\"id\": \"message id\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let id = required_str(&args, "id")?;
        self.store.update(|mb| {
            let idx = mb.find(id)?;
            let m = &mut mb.messages[idx];
            m.labels.retain(|l| !l.eq_ignore_ascii_case(LABEL_UNREAD));
            Ok(format!(
                "From: {}\nTo: {}\nDate: {}\nSubject: {}\n\n{}",
                m.from,
                m.to.join(", "),
                m.date.format("%Y-%m-%d %H:%M"),
                m.subject,
                m.body
            ))
        })
    }
}

pub struct SendMessageTool {
    store: Arc<MailStore>,
    identity: MailIdentity,
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send an email. Recipients may be addresses or full names. Args: {\"to\": \"address or name (comma separated)\", \"subject\": \"text\", \"body\": \"text\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": {"type": "string"},
                "subject": {"type": "string"},
                "body": {"type": "string"}
            },
            "required": ["to", "body"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let to = self.identity.resolve_all(args.get("to").unwrap_or(&Value::Null))?;
        let subject = optional_str(&args, "subject").unwrap_or("(no subject)").to_string();
        let body = required_str(&args, "body")?.to_string();
        let id = new_id();
        let msg = MailMessage {
            id: id.clone(),
            thread_id: id.clone(),
            from: self.identity.sender.clone(),
            to: to.clone(),
            subject,
            body,
            labels: vec![LABEL_SENT.to_string()],
            date: Local::now(),
        };
        tracing::info!(to = %to.join(","), "send_message tool execute");
        self.store.update(|mb| {
            mb.messages.push(msg);
            Ok(format!(
                "✅ Email sent successfully to {} (id: {}).",
                to.join(", "),
                id
            ))
        })
    }
}

pub struct ReplyMessageTool {
    store: Arc<MailStore>,
    identity: MailIdentity,
}

#[async_trait]
impl Tool for ReplyMessageTool {
    fn name(&self) -> &str {
        "reply_message"
    }

    fn description(&self) -> &str {
        "Reply to a message in the same thread. Args: {\"id\": \"message id\", \"body\": \"text\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let id = required_str(&args, "id")?;
        let body = required_str(&args, "body")?.to_string();
        let sender = self.identity.sender.clone();
        self.store.update(|mb| {
            let original = mb.messages[mb.find(id)?].clone();
            let subject = if original.subject.to_lowercase().starts_with("re:") {
                original.subject.clone()
            } else {
                format!("Re: {}", original.subject)
            };
            let reply = MailMessage {
                id: new_id(),
                thread_id: original.thread_id.clone(),
                from: sender,
                to: vec![original.from.clone()],
                subject,
                body,
                labels: vec![LABEL_SENT.to_string()],
                date: Local::now(),
            };
            let msg = format!("✅ Reply sent successfully to {}.", original.from);
            mb.messages.push(reply);
            Ok(msg)
        })
    }
}

pub struct DeleteMessageTool {
    store: Arc<MailStore>,
}

#[async_trait]
impl Tool for DeleteMessageTool {
    fn name(&self) -> &str {
        "delete_message"
    }

    fn description(&self) -> &str {
        "Move a message to trash, or delete it permanently. Args: {\"id\": \"message id\", \"permanent\": false}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let id = required_str(&args, "id")?;
        let permanent = optional_bool(&args, "permanent").unwrap_or(false);
        self.store.update(|mb| {
            let idx = mb.find(id)?;
            if permanent {
                mb.messages.remove(idx);
                Ok(format!("✅ Message {} deleted permanently.", id))
            } else {
                let m = &mut mb.messages[idx];
                m.labels.retain(|l| !l.eq_ignore_ascii_case(LABEL_INBOX));
                if !m.has_label(LABEL_TRASH) {
                    m.labels.push(LABEL_TRASH.to_string());
                }
                Ok(format!("✅ Message {} moved to trash (deleted).", id))
            }
        })
    }
}

pub struct ModifyLabelsTool {
    store: Arc<MailStore>,
}

fn label_list(args: &Value, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(Value::String(s)) => s.split(',').map(|l| l.trim().to_uppercase()).filter(|l| !l.is_empty()).collect(),
        Some(Value::Array(a)) => a
            .iter()
            .filter_map(|v| v.as_str())
            .map(|l| l.trim().to_uppercase())
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Tool for ModifyLabelsTool {
    fn name(&self) -> &str {
        "modify_labels"
    }

    fn description(&self) -> &str {
        "Add or remove labels (e.g. UNREAD, IMPORTANT). Args: {\"id\": \"message id\", \"add\": [\"LABEL\"], \"remove\": [\"LABEL\"]}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let id = required_str(&args, "id")?;
        let add = label_list(&args, "add");
        let remove = label_list(&args, "remove");
        if add.is_empty() && remove.is_empty() {
            return Err("No labels to add or remove".to_string());
        }
        self.store.update(|mb| {
            let idx = mb.find(id)?;
            let m = &mut mb.messages[idx];
            m.labels.retain(|l| !remove.iter().any(|r| r.eq_ignore_ascii_case(l)));
            for l in &add {
                if !m.has_label(l) {
                    m.labels.push(l.clone());
                }
            }
            Ok(format!(
                "✅ Labels updated successfully for {}: {}",
                id,
                m.labels.join(", ")
            ))
        })
    }
}

pub struct ResolveContactTool {
    identity: MailIdentity,
}

#[async_trait]
impl Tool for ResolveContactTool {
    fn name(&self) -> &str {
        "resolve_contact"
    }

    fn description(&self) -> &str {
        "Turn a person's full name into their email address. Args: {\"name\": \"First Last\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let name = required_str(&args, "name")?;
        let addr = contact_address(name, &self.identity.contact_domain)?;
        Ok(format!("{} -> {}", name.trim(), addr))
    }
}

/// 消息能力的完整工具集
pub fn messaging_tools(data_file: Option<PathBuf>, identity: MailIdentity) -> ToolRegistry {
    let store = Arc::new(MailStore::open(data_file));
    let mut registry = ToolRegistry::new();
    registry.register(ListMessagesTool { store: store.clone() });
    registry.register(GetMessageTool { store: store.clone() });
    registry.register(SendMessageTool {
        store: store.clone(),
        identity: identity.clone(),
    });
    registry.register(ReplyMessageTool {
        store: store.clone(),
        identity: identity.clone(),
    });
    registry.register(DeleteMessageTool { store: store.clone() });
    registry.register(ModifyLabelsTool { store });
    registry.register(ResolveContactTool { identity });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> MailIdentity {
        MailIdentity {
            sender: "me@udesa.edu.ar".to_string(),
            contact_domain: "udesa.edu.ar".to_string(),
        }
    }

    #[test]
    fn test_contact_address_rule() {
        assert_eq!(
            contact_address("Juan Pérez", "udesa.edu.ar").unwrap(),
            "jperez@udesa.edu.ar"
        );
        assert_eq!(
            contact_address("María José Núñez", "udesa.edu.ar").unwrap(),
            "mnunez@udesa.edu.ar"
        );
        assert_eq!(contact_address("ana@x.com", "udesa.edu.ar").unwrap(), "ana@x.com");
        assert!(contact_address("  ", "udesa.edu.ar").is_err());
    }

    #[tokio::test]
    async fn test_send_by_name_then_list_sent() {
        let registry = messaging_tools(None, identity());
        let out = registry
            .execute(
                "send_message",
                json!({"to": "Juan Pérez", "subject": "Hola", "body": "¿Nos vemos mañana?"}),
            )
            .await
            .unwrap();
        assert!(out.contains("sent successfully to jperez@udesa.edu.ar"));

        let sent = registry
            .execute("list_messages", json!({"label": "SENT"}))
            .await
            .unwrap();
        assert!(sent.contains("Hola"));
        let inbox = registry.execute("list_messages", json!({})).await.unwrap();
        assert_eq!(inbox, "No messages in INBOX.");
    }

    #[tokio::test]
    async fn test_reply_trash_and_labels() {
        let store = Arc::new(MailStore::in_memory());
        store
            .update(|mb| {
                mb.messages.push(MailMessage {
                    id: "m1".to_string(),
                    thread_id: "m1".to_string(),
                    from: "ana@udesa.edu.ar".to_string(),
                    to: vec!["me@udesa.edu.ar".to_string()],
                    subject: "Informe".to_string(),
                    body: "Adjunto el informe".to_string(),
                    labels: vec![LABEL_INBOX.to_string(), LABEL_UNREAD.to_string()],
                    date: Local::now(),
                });
                Ok(())
            })
            .unwrap();

        let reply = ReplyMessageTool {
            store: store.clone(),
            identity: identity(),
        };
        let out = reply
            .execute(json!({"id": "m1", "body": "Gracias"}))
            .await
            .unwrap();
        assert!(out.contains("ana@udesa.edu.ar"));

        let labels = ModifyLabelsTool { store: store.clone() };
        labels
            .execute(json!({"id": "m1", "remove": ["unread"], "add": "IMPORTANT"}))
            .await
            .unwrap();

        let delete = DeleteMessageTool { store: store.clone() };
        delete.execute(json!({"id": "m1"})).await.unwrap();

        store.read(|mb| {
            let m = &mb.messages[mb.find("m1").unwrap()];
            assert!(m.has_label(LABEL_TRASH));
            assert!(m.has_label("IMPORTANT"));
            assert!(!m.has_label(LABEL_UNREAD));
            assert!(!m.has_label(LABEL_INBOX));
            assert!(mb.messages.iter().any(|r| r.subject == "Re: Informe"));
        });
    }
}
