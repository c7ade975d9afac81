use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::auth::{find_admin, staff_by_id};
use crate::error::EngineError;
use crate::sequencer::{is_unique_violation, next_ticket_id};
use crate::settings;
use crate::types::{
    AssignedLead, AssigneeEntry, ConversationTurn, Lead, StaffUser, TicketPage, TicketSummary,
    TurnSender, SEND_BY_LEAD, SEND_BY_MEMBER, STATUS_RESOLVED, STATUS_UNRESOLVED,
};

pub const NO_MESSAGE_PLACEHOLDER: &str = "No message yet";

const TICKET_INSERT_RETRIES: usize = 5;

fn lead_from_row(row: sqlx::postgres::PgRow) -> Lead {
    Lead {
        lead_id: row.get("id"),
        ticket_id: row.get("ticket_id"),
        user_name: row.get("user_name"),
        user_email: row.get("user_email"),
        user_phone: row.get("user_phone"),
        current_assignee: row.get("current_assignee"),
        assignee_list: serde_json::from_str(&row.get::<String, _>("assignee_list"))
            .unwrap_or_default(),
        is_first_message_shared: row.get("is_first_message_shared"),
        is_details_shared: row.get("is_details_shared"),
        status: row.get("status"),
        response_time: row.get("response_time"),
        is_missed_chat: row.get("is_missed_chat"),
        created_at: row.get("created_at"),
    }
}

async fn lead_by_id(db: &PgPool, lead_id: &str) -> Result<Option<Lead>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM leads WHERE id = $1")
        .bind(lead_id)
        .fetch_optional(db)
        .await?;
    Ok(row.map(lead_from_row))
}

async fn append_turn(
    db: &PgPool,
    lead_id: &str,
    message: &str,
    send_by: &str,
    assignee_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO conversations (id, lead_id, message, send_by, assignee_id, created_at) \
         VALUES ($1,$2,$3,$4,$5,$6)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(lead_id)
    .bind(message)
    .bind(send_by)
    .bind(assignee_id)
    .bind(Utc::now())
    .execute(db)
    .await?;
    Ok(())
}

pub fn valid_email(value: &str) -> bool {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Authorization gate shared by every assignee-only mutation.
pub fn require_current_assignee(
    lead: &Lead,
    staff_id: &str,
    denied: &'static str,
) -> Result<(), EngineError> {
    if lead.current_assignee.as_deref() == Some(staff_id) {
        Ok(())
    } else {
        Err(EngineError::Forbidden(denied))
    }
}

/// The two staff-reply side effects as a pure decision.
///
/// Response time stamps once: 0 is the "never replied" sentinel, and the
/// first reply records whole seconds since creation, clamped to at least 1.
/// The missed flag is one-way.
pub fn staff_reply_effects(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    response_time: i64,
    is_missed_chat: bool,
    threshold_secs: i64,
) -> (i64, bool) {
    let elapsed = (now - created_at).num_seconds();
    let response_time = if response_time == 0 {
        elapsed.max(1)
    } else {
        response_time
    };
    let missed = is_missed_chat || (threshold_secs > 0 && elapsed > threshold_secs);
    (response_time, missed)
}

/// Leads created strictly before this instant with no staff reply are
/// overdue. `None` when the timer is unset (detection disabled).
pub fn sweep_cutoff(now: DateTime<Utc>, threshold_secs: i64) -> Option<DateTime<Utc>> {
    if threshold_secs > 0 {
        Some(now - chrono::Duration::seconds(threshold_secs))
    } else {
        None
    }
}

/// Clamp paging inputs and derive the window. Pages are 1-based.
pub fn page_window(page: Option<i64>, limit: Option<i64>, total: i64) -> (i64, i64, i64, i64) {
    let limit = limit.unwrap_or(10).clamp(1, 100);
    let page = page.unwrap_or(1).max(1);
    let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
    let offset = (page - 1) * limit;
    (page, limit, offset, total_pages)
}

/// Open a new lead from a visitor's first message.
///
/// Ticket sequencing and the insert race under concurrent creation; the
/// UNIQUE constraint on `leads.ticket_id` rejects the loser, which resequences
/// and tries again.
pub async fn create_lead(db: &PgPool, message: &str) -> Result<String, EngineError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(EngineError::invalid("message is required"));
    }
    let admin = find_admin(db).await?.ok_or(EngineError::NoAdminConfigured)?;

    let lead_id = Uuid::new_v4().to_string();
    let assignee_list = serde_json::to_string(&vec![admin.id.clone()])
        .unwrap_or_else(|_| "[]".to_string());

    let mut attempt = 0;
    loop {
        let ticket_id = next_ticket_id(db).await?;
        let inserted = sqlx::query(
            "INSERT INTO leads (id, ticket_id, current_assignee, assignee_list, \
             is_first_message_shared, is_details_shared, status, response_time, \
             is_missed_chat, created_at) VALUES ($1,$2,$3,$4,TRUE,FALSE,$5,0,FALSE,$6)",
        )
        .bind(&lead_id)
        .bind(&ticket_id)
        .bind(&admin.id)
        .bind(&assignee_list)
        .bind(STATUS_UNRESOLVED)
        .bind(Utc::now())
        .execute(db)
        .await;
        match inserted {
            Ok(_) => break,
            Err(err) if is_unique_violation(&err) && attempt < TICKET_INSERT_RETRIES => {
                attempt += 1;
                tracing::debug!(%ticket_id, attempt, "ticket code collision, resequencing");
            }
            Err(err) => return Err(err.into()),
        }
    }

    append_turn(db, &lead_id, message, SEND_BY_LEAD, None).await?;
    Ok(lead_id)
}

/// Contact details from the widget form; overwrites earlier submissions.
pub async fn submit_lead_form(
    db: &PgPool,
    lead_id: &str,
    name: Option<&str>,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<(), EngineError> {
    let name = name.map(str::trim).unwrap_or_default();
    let email = email.map(str::trim).unwrap_or_default();
    let phone = phone.map(str::trim).unwrap_or_default();
    if name.is_empty() || email.is_empty() || phone.is_empty() {
        return Err(EngineError::invalid("name, email and phone are required"));
    }
    if !valid_email(email) {
        return Err(EngineError::invalid("invalid email address"));
    }

    let updated = sqlx::query(
        "UPDATE leads SET user_name = $1, user_email = $2, user_phone = $3, \
         is_details_shared = TRUE WHERE id = $4",
    )
    .bind(name)
    .bind(email)
    .bind(phone)
    .bind(lead_id)
    .execute(db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(EngineError::NotFound("lead"));
    }
    Ok(())
}

/// A follow-up visitor message. Never touches response time or the missed
/// flag; those move only on staff replies.
pub async fn post_visitor_message(
    db: &PgPool,
    lead_id: &str,
    message: &str,
) -> Result<(), EngineError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(EngineError::invalid("message is required"));
    }
    lead_by_id(db, lead_id)
        .await?
        .ok_or(EngineError::NotFound("lead"))?;
    append_turn(db, lead_id, message, SEND_BY_LEAD, None).await?;
    Ok(())
}

/// A staff reply. Only the current assignee may post. Stamps response time
/// on the first-ever reply, flags the chat as missed when the reply came
/// past the SLA threshold, then appends the turn.
pub async fn post_staff_message(
    db: &PgPool,
    lead_id: &str,
    staff: &StaffUser,
    message: &str,
) -> Result<(), EngineError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(EngineError::invalid("message is required"));
    }
    let lead = lead_by_id(db, lead_id)
        .await?
        .ok_or(EngineError::NotFound("lead"))?;
    require_current_assignee(&lead, &staff.id, "only the current assignee can reply")?;

    let widget = settings::get_or_seed(db).await?;
    let threshold = settings::threshold_secs(&widget.missed_chat_timer);
    let (response_time, is_missed) = staff_reply_effects(
        lead.created_at,
        Utc::now(),
        lead.response_time,
        lead.is_missed_chat,
        threshold,
    );

    sqlx::query("UPDATE leads SET response_time = $1, is_missed_chat = $2 WHERE id = $3")
        .bind(response_time)
        .bind(is_missed)
        .bind(lead_id)
        .execute(db)
        .await?;
    append_turn(db, lead_id, message, SEND_BY_MEMBER, Some(&staff.id)).await?;
    Ok(())
}

/// Resolve or reopen a ticket. Assignee-gated, otherwise unconstrained:
/// either status may be set from either side.
pub async fn update_status(
    db: &PgPool,
    lead_id: &str,
    staff: &StaffUser,
    status: &str,
) -> Result<(), EngineError> {
    if status != STATUS_UNRESOLVED && status != STATUS_RESOLVED {
        return Err(EngineError::invalid("status must be unresolved or resolved"));
    }
    let lead = lead_by_id(db, lead_id)
        .await?
        .ok_or(EngineError::NotFound("lead"))?;
    require_current_assignee(
        &lead,
        &staff.id,
        "only the current assignee can change the status",
    )?;
    sqlx::query("UPDATE leads SET status = $1 WHERE id = $2")
        .bind(status)
        .bind(lead_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Hand a ticket to another staff member. Admin-only. The new assignee is
/// prepended to the history list; reassigning back to someone already in the
/// list adds a fresh entry rather than deduplicating.
pub async fn reassign(
    db: &PgPool,
    lead_id: &str,
    requesting: &StaffUser,
    new_assignee_id: &str,
) -> Result<(), EngineError> {
    if !requesting.is_admin() {
        return Err(EngineError::Forbidden("only the admin can reassign tickets"));
    }
    staff_by_id(db, new_assignee_id)
        .await?
        .ok_or(EngineError::NotFound("user"))?;
    let lead = lead_by_id(db, lead_id)
        .await?
        .ok_or(EngineError::NotFound("lead"))?;

    let mut assignee_list = lead.assignee_list;
    assignee_list.insert(0, new_assignee_id.to_string());
    sqlx::query("UPDATE leads SET current_assignee = $1, assignee_list = $2 WHERE id = $3")
        .bind(new_assignee_id)
        .bind(serde_json::to_string(&assignee_list).unwrap_or_else(|_| "[]".to_string()))
        .bind(lead_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Flag every overdue unanswered lead in one pass. Idempotent; run lazily
/// before ticket-list reads. Returns the number of newly flagged leads.
pub async fn sweep_missed_chats(db: &PgPool) -> Result<u64, EngineError> {
    let widget = settings::get_or_seed(db).await?;
    let threshold = settings::threshold_secs(&widget.missed_chat_timer);
    let Some(cutoff) = sweep_cutoff(Utc::now(), threshold) else {
        return Ok(0);
    };
    let result = sqlx::query(
        "UPDATE leads SET is_missed_chat = TRUE \
         WHERE response_time = 0 AND is_missed_chat = FALSE AND created_at < $1",
    )
    .bind(cutoff)
    .execute(db)
    .await?;
    let flagged = result.rows_affected();
    if flagged > 0 {
        tracing::info!(flagged, "flagged overdue leads as missed chats");
    }
    Ok(flagged)
}

fn summary_from_row(row: sqlx::postgres::PgRow) -> TicketSummary {
    TicketSummary {
        lead_id: row.get("id"),
        ticket_id: row.get("ticket_id"),
        user_name: row.get("user_name"),
        status: row.get("status"),
        is_missed_chat: row.get("is_missed_chat"),
        latest_message: row
            .get::<Option<String>, _>("latest_message")
            .unwrap_or_else(|| NO_MESSAGE_PLACEHOLDER.to_string()),
        created_at: row.get("created_at"),
    }
}

const LATEST_VISITOR_MESSAGE: &str = "(SELECT c.message FROM conversations c \
     WHERE c.lead_id = l.id AND c.send_by = 'lead' \
     ORDER BY c.created_at DESC LIMIT 1) AS latest_message";

/// One page of the ticket list, newest first, each lead annotated with its
/// most recent visitor-authored message. No side effects.
pub async fn list_tickets(
    db: &PgPool,
    page: Option<i64>,
    limit: Option<i64>,
    status_filter: Option<&str>,
) -> Result<TicketPage, EngineError> {
    let status_filter = match status_filter.map(str::trim) {
        None | Some("") => None,
        Some(s) if s == STATUS_UNRESOLVED || s == STATUS_RESOLVED => Some(s),
        Some(_) => {
            return Err(EngineError::invalid("status must be unresolved or resolved"));
        }
    };

    let total: i64 = match status_filter {
        Some(status) => sqlx::query_scalar("SELECT COUNT(1) FROM leads WHERE status = $1")
            .bind(status)
            .fetch_one(db)
            .await?,
        None => sqlx::query_scalar("SELECT COUNT(1) FROM leads")
            .fetch_one(db)
            .await?,
    };
    let (page, limit, offset, total_pages) = page_window(page, limit, total);

    let rows = match status_filter {
        Some(status) => {
            sqlx::query(&format!(
                "SELECT l.*, {LATEST_VISITOR_MESSAGE} FROM leads l WHERE l.status = $1 \
                 ORDER BY l.created_at DESC LIMIT $2 OFFSET $3"
            ))
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(db)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT l.*, {LATEST_VISITOR_MESSAGE} FROM leads l \
                 ORDER BY l.created_at DESC LIMIT $1 OFFSET $2"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(db)
            .await?
        }
    };

    Ok(TicketPage {
        total_leads: total,
        total_pages,
        current_page: page,
        limit,
        leads_list: rows.into_iter().map(summary_from_row).collect(),
    })
}

/// Leads visible to a staff member: the admin sees everything, a member
/// sees every lead they ever appeared on (assignment history, not just the
/// current hand).
pub async fn list_assigned_leads(
    db: &PgPool,
    requesting: &StaffUser,
) -> Result<Vec<AssignedLead>, EngineError> {
    let rows = sqlx::query(&format!(
        "SELECT l.*, {LATEST_VISITOR_MESSAGE} FROM leads l ORDER BY l.created_at DESC"
    ))
    .fetch_all(db)
    .await?;

    let staff_rows = sqlx::query("SELECT id, user_name FROM users")
        .fetch_all(db)
        .await?;
    let names: std::collections::HashMap<String, String> = staff_rows
        .into_iter()
        .map(|row| (row.get("id"), row.get("user_name")))
        .collect();

    let mut out = Vec::new();
    for row in rows {
        let latest_message = row
            .get::<Option<String>, _>("latest_message")
            .unwrap_or_else(|| NO_MESSAGE_PLACEHOLDER.to_string());
        let lead = lead_from_row(row);
        if !requesting.is_admin() && !lead.assignee_list.contains(&requesting.id) {
            continue;
        }
        let assignees = lead
            .assignee_list
            .iter()
            .filter_map(|id| {
                names.get(id).map(|name| AssigneeEntry {
                    id: id.clone(),
                    user_name: name.clone(),
                })
            })
            .collect();
        out.push(AssignedLead {
            is_current_assignee: lead.current_assignee.as_deref() == Some(requesting.id.as_str()),
            lead_id: lead.lead_id,
            ticket_id: lead.ticket_id,
            user_name: lead.user_name,
            status: lead.status,
            is_missed_chat: lead.is_missed_chat,
            latest_message,
            assignees,
            created_at: lead.created_at,
        });
    }
    Ok(out)
}

pub async fn get_lead_detail(db: &PgPool, lead_id: &str) -> Result<Lead, EngineError> {
    lead_by_id(db, lead_id)
        .await?
        .ok_or(EngineError::NotFound("lead"))
}

/// The full thread for a lead, staff turns labelled with the posting
/// member's display name.
pub async fn get_conversation(
    db: &PgPool,
    lead_id: &str,
) -> Result<Vec<ConversationTurn>, EngineError> {
    lead_by_id(db, lead_id)
        .await?
        .ok_or(EngineError::NotFound("lead"))?;

    let rows = sqlx::query(
        "SELECT c.id, c.lead_id, c.message, c.send_by, c.assignee_id, c.created_at, \
         u.user_name AS assignee_name \
         FROM conversations c LEFT JOIN users u ON u.id = c.assignee_id \
         WHERE c.lead_id = $1 ORDER BY c.created_at",
    )
    .bind(lead_id)
    .fetch_all(db)
    .await?;

    let turns = rows
        .into_iter()
        .map(|row| {
            let send_by: String = row.get("send_by");
            let sender = if send_by == SEND_BY_MEMBER {
                TurnSender::Member {
                    assignee_id: row
                        .get::<Option<String>, _>("assignee_id")
                        .unwrap_or_default(),
                    assignee_name: row
                        .get::<Option<String>, _>("assignee_name")
                        .unwrap_or_else(|| "Staff".to_string()),
                }
            } else {
                TurnSender::Lead
            };
            ConversationTurn {
                id: row.get("id"),
                lead_id: row.get("lead_id"),
                message: row.get("message"),
                sender,
                created_at: row.get("created_at"),
            }
        })
        .collect();
    Ok(turns)
}

/// Explicit cascade: a lead exclusively owns its conversation turns. The
/// ticket code stays burned; the sequencer never reissues it.
pub async fn delete_lead(db: &PgPool, lead_id: &str) -> Result<(), EngineError> {
    lead_by_id(db, lead_id)
        .await?
        .ok_or(EngineError::NotFound("lead"))?;
    sqlx::query("DELETE FROM conversations WHERE lead_id = $1")
        .bind(lead_id)
        .execute(db)
        .await?;
    sqlx::query("DELETE FROM leads WHERE id = $1")
        .bind(lead_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Deletion gate: admin-only, and the admin account itself is permanent.
pub fn require_deletable_member(
    requesting: &StaffUser,
    target: &StaffUser,
) -> Result<(), EngineError> {
    if !requesting.is_admin() {
        return Err(EngineError::Forbidden("only the admin can delete users"));
    }
    if target.is_admin() {
        return Err(EngineError::Forbidden("the admin account cannot be deleted"));
    }
    Ok(())
}

/// Replace every history occurrence of a removed member with the admin,
/// keeping order and duplicates intact.
pub fn rewrite_assignee_history(
    list: Vec<String>,
    target_id: &str,
    admin_id: &str,
) -> Vec<String> {
    list.into_iter()
        .map(|entry| {
            if entry == target_id {
                admin_id.to_string()
            } else {
                entry
            }
        })
        .collect()
}

/// Remove a member, handing their workload to the admin: every lead they
/// currently hold, every history entry naming them, and every conversation
/// turn they authored is re-pointed at the admin before the user row goes.
pub async fn delete_staff_user(
    db: &PgPool,
    requesting: &StaffUser,
    target_id: &str,
) -> Result<(), EngineError> {
    if !requesting.is_admin() {
        return Err(EngineError::Forbidden("only the admin can delete users"));
    }
    let target = staff_by_id(db, target_id)
        .await?
        .ok_or(EngineError::NotFound("user"))?;
    require_deletable_member(requesting, &target)?;
    let admin_id = &requesting.id;

    sqlx::query("UPDATE leads SET current_assignee = $1 WHERE current_assignee = $2")
        .bind(admin_id)
        .bind(target_id)
        .execute(db)
        .await?;

    // rewrite assignment histories that mention the member
    let pattern = format!("%\"{target_id}\"%");
    let rows = sqlx::query("SELECT id, assignee_list FROM leads WHERE assignee_list LIKE $1")
        .bind(&pattern)
        .fetch_all(db)
        .await?;
    for row in rows {
        let id: String = row.get("id");
        let list: Vec<String> =
            serde_json::from_str(&row.get::<String, _>("assignee_list")).unwrap_or_default();
        let rewritten = rewrite_assignee_history(list, target_id, admin_id);
        sqlx::query("UPDATE leads SET assignee_list = $1 WHERE id = $2")
            .bind(serde_json::to_string(&rewritten).unwrap_or_else(|_| "[]".to_string()))
            .bind(&id)
            .execute(db)
            .await?;
    }

    sqlx::query("UPDATE conversations SET assignee_id = $1 WHERE assignee_id = $2")
        .bind(admin_id)
        .bind(target_id)
        .execute(db)
        .await?;
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(target_id)
        .execute(db)
        .await?;
    tracing::info!(user = %target.email, "member deleted, workload reassigned to admin");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, 9, 0, 0).unwrap()
    }

    const ONE_HOUR: i64 = 3600;

    #[test]
    fn first_reply_stamps_response_time_once() {
        let (rt, missed) = staff_reply_effects(t0(), t0() + Duration::minutes(30), 0, false, ONE_HOUR);
        assert_eq!(rt, 1800);
        assert!(!missed);

        // a second reply two hours in changes nothing already stamped
        let (rt, _) = staff_reply_effects(t0(), t0() + Duration::hours(2), rt, missed, ONE_HOUR);
        assert_eq!(rt, 1800);
    }

    #[test]
    fn late_first_reply_flags_missed_and_keeps_real_duration() {
        let (rt, missed) = staff_reply_effects(t0(), t0() + Duration::hours(2), 0, false, ONE_HOUR);
        assert_eq!(rt, 7200);
        assert!(missed);
    }

    #[test]
    fn missed_flag_never_clears() {
        let (_, missed) = staff_reply_effects(t0(), t0() + Duration::minutes(5), 1800, true, ONE_HOUR);
        assert!(missed);
    }

    #[test]
    fn zero_threshold_disables_missed_detection() {
        let (_, missed) = staff_reply_effects(t0(), t0() + Duration::days(3), 0, false, 0);
        assert!(!missed);
    }

    #[test]
    fn sub_second_reply_never_collides_with_sentinel() {
        let (rt, _) = staff_reply_effects(t0(), t0(), 0, false, ONE_HOUR);
        assert_eq!(rt, 1);
    }

    #[test]
    fn reply_effects_are_idempotent_under_retry() {
        let now = t0() + Duration::hours(2);
        let first = staff_reply_effects(t0(), now, 0, false, ONE_HOUR);
        let retried = staff_reply_effects(t0(), now, first.0, first.1, ONE_HOUR);
        assert_eq!(first, retried);
    }

    #[test]
    fn sweep_cutoff_is_disabled_without_threshold() {
        assert!(sweep_cutoff(t0(), 0).is_none());
        assert!(sweep_cutoff(t0(), -5).is_none());
    }

    #[test]
    fn sweep_flags_only_overdue_unanswered_leads() {
        let now = t0() + Duration::hours(3);
        let cutoff = sweep_cutoff(now, ONE_HOUR).unwrap();
        // unanswered for 3h: overdue
        assert!(t0() < cutoff);
        // created 30 minutes ago: not yet overdue
        assert!(now - Duration::minutes(30) >= cutoff);
    }

    #[test]
    fn sweep_predicate_is_idempotent() {
        // (response_time, is_missed, overdue) -> flagged set is stable
        let now = t0() + Duration::hours(3);
        let cutoff = sweep_cutoff(now, ONE_HOUR).unwrap();
        let mut leads = vec![
            (0i64, false, t0()),
            (0, false, now - Duration::minutes(10)),
            (1800, false, t0()),
            (0, true, t0()),
        ];
        let apply = |leads: &mut Vec<(i64, bool, DateTime<Utc>)>| {
            for lead in leads.iter_mut() {
                if lead.0 == 0 && !lead.1 && lead.2 < cutoff {
                    lead.1 = true;
                }
            }
        };
        apply(&mut leads);
        let once: Vec<bool> = leads.iter().map(|l| l.1).collect();
        apply(&mut leads);
        let twice: Vec<bool> = leads.iter().map(|l| l.1).collect();
        assert_eq!(once, vec![true, false, false, true]);
        assert_eq!(once, twice);
    }

    fn lead_held_by(assignee: &str) -> Lead {
        Lead {
            lead_id: "lead-1".to_string(),
            ticket_id: "2025-0307".to_string(),
            user_name: None,
            user_email: None,
            user_phone: None,
            current_assignee: Some(assignee.to_string()),
            assignee_list: vec![assignee.to_string()],
            is_first_message_shared: true,
            is_details_shared: false,
            status: STATUS_UNRESOLVED.to_string(),
            response_time: 0,
            is_missed_chat: false,
            created_at: t0(),
        }
    }

    #[test]
    fn only_the_current_assignee_passes_the_gate() {
        let lead = lead_held_by("member-a");
        assert!(require_current_assignee(&lead, "member-a", "denied").is_ok());
        let err = require_current_assignee(&lead, "member-b", "denied");
        assert!(matches!(err, Err(EngineError::Forbidden(_))));
    }

    #[test]
    fn unassigned_lead_rejects_everyone() {
        let mut lead = lead_held_by("member-a");
        lead.current_assignee = None;
        assert!(require_current_assignee(&lead, "member-a", "denied").is_err());
    }

    fn staff(id: &str, role: &str) -> StaffUser {
        StaffUser {
            id: id.to_string(),
            user_name: id.to_string(),
            email: format!("{id}@example.com"),
            user_role: role.to_string(),
            parent: None,
            created_at: t0(),
        }
    }

    #[test]
    fn member_deletion_rewrites_every_history_occurrence() {
        let list = vec![
            "member-b".to_string(),
            "member-a".to_string(),
            "member-b".to_string(),
            "admin-1".to_string(),
        ];
        let rewritten = rewrite_assignee_history(list, "member-b", "admin-1");
        assert_eq!(rewritten, vec!["admin-1", "member-a", "admin-1", "admin-1"]);
    }

    #[test]
    fn rewrite_keeps_the_new_current_assignee_in_the_history() {
        // the deleted member held the lead; after the saga the admin is the
        // current assignee and must still appear in the rewritten list
        let list = vec!["member-b".to_string(), "admin-1".to_string()];
        let rewritten = rewrite_assignee_history(list, "member-b", "admin-1");
        assert!(rewritten.contains(&"admin-1".to_string()));
        assert!(!rewritten.contains(&"member-b".to_string()));
    }

    #[test]
    fn rewrite_leaves_unrelated_histories_alone() {
        let list = vec!["member-a".to_string()];
        let rewritten = rewrite_assignee_history(list.clone(), "member-b", "admin-1");
        assert_eq!(rewritten, list);
    }

    #[test]
    fn deleting_the_admin_is_rejected() {
        let admin = staff("admin-1", crate::types::ROLE_ADMIN);
        let err = require_deletable_member(&admin, &admin);
        assert!(matches!(err, Err(EngineError::Forbidden(_))));
    }

    #[test]
    fn only_the_admin_may_delete_members() {
        let member_a = staff("member-a", crate::types::ROLE_MEMBER);
        let member_b = staff("member-b", crate::types::ROLE_MEMBER);
        let err = require_deletable_member(&member_a, &member_b);
        assert!(matches!(err, Err(EngineError::Forbidden(_))));
    }

    #[test]
    fn admin_may_delete_a_member() {
        let admin = staff("admin-1", crate::types::ROLE_ADMIN);
        let member = staff("member-b", crate::types::ROLE_MEMBER);
        assert!(require_deletable_member(&admin, &member).is_ok());
    }

    #[test]
    fn page_window_defaults_and_clamps() {
        assert_eq!(page_window(None, None, 25), (1, 10, 0, 3));
        assert_eq!(page_window(Some(3), Some(10), 25), (3, 10, 20, 3));
        assert_eq!(page_window(Some(0), Some(0), 25), (1, 1, 0, 25));
        assert_eq!(page_window(Some(2), Some(1000), 25), (2, 100, 100, 1));
    }

    #[test]
    fn empty_lead_set_has_zero_pages() {
        assert_eq!(page_window(None, None, 0), (1, 10, 0, 0));
    }

    #[test]
    fn email_shape_check() {
        assert!(valid_email("jane@example.com"));
        assert!(valid_email("a.b+c@mail.co.uk"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing@tld"));
        assert!(!valid_email("spaces in@example.com"));
    }
}
