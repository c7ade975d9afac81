use sqlx::{PgPool, Row};

use crate::error::EngineError;
use crate::types::{MissedChatTimer, SettingsPatch, WidgetSettings};

const SETTINGS_ROW_ID: &str = "widget-settings";

fn default_settings() -> WidgetSettings {
    WidgetSettings {
        header_color: "#33475b".to_string(),
        background_color: "#eeeeee".to_string(),
        custom_messages: vec![
            "How can we help?".to_string(),
            "Ask us anything, we reply fast.".to_string(),
        ],
        name_placeholder: "Your name".to_string(),
        email_placeholder: "example@gmail.com".to_string(),
        phone_placeholder: "+1 (000) 000-0000".to_string(),
        button_text: "Thank You!".to_string(),
        welcome_message: "Hey there! Leave us a message and we will get back to you."
            .to_string(),
        missed_chat_timer: MissedChatTimer {
            hour: 1,
            minute: 0,
            second: 0,
        },
    }
}

fn settings_from_row(row: sqlx::postgres::PgRow) -> WidgetSettings {
    WidgetSettings {
        header_color: row.get("header_color"),
        background_color: row.get("background_color"),
        custom_messages: serde_json::from_str(&row.get::<String, _>("custom_messages"))
            .unwrap_or_default(),
        name_placeholder: row.get("name_placeholder"),
        email_placeholder: row.get("email_placeholder"),
        phone_placeholder: row.get("phone_placeholder"),
        button_text: row.get("button_text"),
        welcome_message: row.get("welcome_message"),
        missed_chat_timer: MissedChatTimer {
            hour: row.get("missed_chat_hours"),
            minute: row.get("missed_chat_minutes"),
            second: row.get("missed_chat_seconds"),
        },
    }
}

/// Fetch the settings singleton, seeding the defaults on first read.
/// ON CONFLICT DO NOTHING keeps racing first reads to one seeded row.
pub async fn get_or_seed(db: &PgPool) -> Result<WidgetSettings, EngineError> {
    if let Some(row) = sqlx::query("SELECT * FROM settings LIMIT 1")
        .fetch_optional(db)
        .await?
    {
        return Ok(settings_from_row(row));
    }

    let defaults = default_settings();
    sqlx::query(
        "INSERT INTO settings (id, header_color, background_color, custom_messages, \
         name_placeholder, email_placeholder, phone_placeholder, button_text, \
         welcome_message, missed_chat_hours, missed_chat_minutes, missed_chat_seconds) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12) ON CONFLICT (id) DO NOTHING",
    )
    .bind(SETTINGS_ROW_ID)
    .bind(&defaults.header_color)
    .bind(&defaults.background_color)
    .bind(serde_json::to_string(&defaults.custom_messages).unwrap_or_else(|_| "[]".into()))
    .bind(&defaults.name_placeholder)
    .bind(&defaults.email_placeholder)
    .bind(&defaults.phone_placeholder)
    .bind(&defaults.button_text)
    .bind(&defaults.welcome_message)
    .bind(defaults.missed_chat_timer.hour)
    .bind(defaults.missed_chat_timer.minute)
    .bind(defaults.missed_chat_timer.second)
    .execute(db)
    .await?;

    let row = sqlx::query("SELECT * FROM settings LIMIT 1")
        .fetch_one(db)
        .await?;
    Ok(settings_from_row(row))
}

/// Read-modify-write of the singleton; absent fields keep their value.
pub async fn update(db: &PgPool, patch: SettingsPatch) -> Result<WidgetSettings, EngineError> {
    let mut current = get_or_seed(db).await?;

    if let Some(v) = patch.header_color {
        current.header_color = v;
    }
    if let Some(v) = patch.background_color {
        current.background_color = v;
    }
    if let Some(v) = patch.custom_messages {
        current.custom_messages = v;
    }
    if let Some(v) = patch.name_placeholder {
        current.name_placeholder = v;
    }
    if let Some(v) = patch.email_placeholder {
        current.email_placeholder = v;
    }
    if let Some(v) = patch.phone_placeholder {
        current.phone_placeholder = v;
    }
    if let Some(v) = patch.button_text {
        current.button_text = v;
    }
    if let Some(v) = patch.welcome_message {
        current.welcome_message = v;
    }
    if let Some(timer) = patch.missed_chat_timer {
        if timer.hour < 0 || !(0..60).contains(&timer.minute) || !(0..60).contains(&timer.second)
        {
            return Err(EngineError::invalid("invalid missed chat timer"));
        }
        current.missed_chat_timer = timer;
    }

    sqlx::query(
        "UPDATE settings SET header_color = $1, background_color = $2, custom_messages = $3, \
         name_placeholder = $4, email_placeholder = $5, phone_placeholder = $6, \
         button_text = $7, welcome_message = $8, missed_chat_hours = $9, \
         missed_chat_minutes = $10, missed_chat_seconds = $11",
    )
    .bind(&current.header_color)
    .bind(&current.background_color)
    .bind(serde_json::to_string(&current.custom_messages).unwrap_or_else(|_| "[]".into()))
    .bind(&current.name_placeholder)
    .bind(&current.email_placeholder)
    .bind(&current.phone_placeholder)
    .bind(&current.button_text)
    .bind(&current.welcome_message)
    .bind(current.missed_chat_timer.hour)
    .bind(current.missed_chat_timer.minute)
    .bind(current.missed_chat_timer.second)
    .execute(db)
    .await?;

    Ok(current)
}

/// Missed-chat SLA threshold in seconds; 0 disables missed-chat detection.
pub fn threshold_secs(timer: &MissedChatTimer) -> i64 {
    timer.hour * 3600 + timer.minute * 60 + timer.second
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_sums_hours_minutes_seconds() {
        let timer = MissedChatTimer {
            hour: 1,
            minute: 30,
            second: 15,
        };
        assert_eq!(threshold_secs(&timer), 5415);
    }

    #[test]
    fn zero_timer_disables_detection() {
        let timer = MissedChatTimer {
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert_eq!(threshold_secs(&timer), 0);
    }
}
