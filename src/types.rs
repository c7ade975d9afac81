use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MEMBER: &str = "member";

pub const STATUS_UNRESOLVED: &str = "unresolved";
pub const STATUS_RESOLVED: &str = "resolved";

pub const SEND_BY_LEAD: &str = "lead";
pub const SEND_BY_MEMBER: &str = "member";

pub struct AppState {
    pub db: PgPool,
    pub token_secret: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffUser {
    pub id: String,
    pub user_name: String,
    pub email: String,
    pub user_role: String,
    pub parent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StaffUser {
    pub fn is_admin(&self) -> bool {
        self.user_role == ROLE_ADMIN
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub lead_id: String,
    pub ticket_id: String,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub user_phone: Option<String>,
    pub current_assignee: Option<String>,
    pub assignee_list: Vec<String>,
    pub is_first_message_shared: bool,
    pub is_details_shared: bool,
    pub status: String,
    pub response_time: i64,
    pub is_missed_chat: bool,
    pub created_at: DateTime<Utc>,
}

/// Who authored a conversation turn. Staff turns always carry the
/// posting assignee; visitor turns never do.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "by", rename_all = "camelCase")]
pub enum TurnSender {
    Lead,
    #[serde(rename_all = "camelCase")]
    Member {
        assignee_id: String,
        assignee_name: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub id: String,
    pub lead_id: String,
    pub message: String,
    pub sender: TurnSender,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSummary {
    pub lead_id: String,
    pub ticket_id: String,
    pub user_name: Option<String>,
    pub status: String,
    pub is_missed_chat: bool,
    pub latest_message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPage {
    pub total_leads: i64,
    pub total_pages: i64,
    pub current_page: i64,
    pub limit: i64,
    pub leads_list: Vec<TicketSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssigneeEntry {
    pub id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedLead {
    pub lead_id: String,
    pub ticket_id: String,
    pub user_name: Option<String>,
    pub status: String,
    pub is_missed_chat: bool,
    pub latest_message: String,
    pub assignees: Vec<AssigneeEntry>,
    pub is_current_assignee: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSettings {
    pub header_color: String,
    pub background_color: String,
    pub custom_messages: Vec<String>,
    pub name_placeholder: String,
    pub email_placeholder: String,
    pub phone_placeholder: String,
    pub button_text: String,
    pub welcome_message: String,
    pub missed_chat_timer: MissedChatTimer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissedChatTimer {
    pub hour: i64,
    pub minute: i64,
    pub second: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub total_leads: i64,
    pub total_resolved_leads: i64,
    pub average_response_time: i64,
    pub lead_graph: Vec<i64>,
}

// request bodies

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub user_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeadBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadFormBody {
    pub lead_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub lead_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssigneeBody {
    pub lead_id: String,
    pub assignee_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default)]
    pub header_color: Option<String>,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub custom_messages: Option<Vec<String>>,
    #[serde(default)]
    pub name_placeholder: Option<String>,
    #[serde(default)]
    pub email_placeholder: Option<String>,
    #[serde(default)]
    pub phone_placeholder: Option<String>,
    #[serde(default)]
    pub button_text: Option<String>,
    #[serde(default)]
    pub welcome_message: Option<String>,
    #[serde(default)]
    pub missed_chat_timer: Option<MissedChatTimer>,
}
