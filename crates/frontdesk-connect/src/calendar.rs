//! Calendar client: slot proposal and estimate booking.
//!
//! Proposal is a local business-hours computation (no remote call needed to
//! offer times); only the actual booking goes out over HTTP.

use crate::error::ConnectError;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use frontdesk_types::{Booking, SlotProposal};
use serde_json::{json, Value};

/// First bookable hour of the day (UTC).
const OPEN_HOUR: u32 = 9;
/// Hour after which no new slot starts (UTC).
const CLOSE_HOUR: u32 = 17;

#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// Proposes up to `count` one-hour slots after `now`, business hours
    /// only, earliest first.
    async fn propose_slots(
        &self,
        now: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<SlotProposal>, ConnectError>;

    /// Books a slot on the calendar and returns the created event.
    async fn book_slot(
        &self,
        slot: &SlotProposal,
        summary: &str,
        attendee_email: Option<&str>,
    ) -> Result<Booking, ConnectError>;
}

/// Walks forward from `now` emitting one-hour business-hour slots, skipping
/// weekends. The first candidate is the next full hour at least one hour out.
pub fn business_hour_slots(now: DateTime<Utc>, count: usize) -> Vec<SlotProposal> {
    let mut slots = Vec::with_capacity(count);
    let mut cursor = (now + Duration::hours(2))
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);

    while slots.len() < count {
        let weekday = cursor.weekday();
        let in_hours = cursor.hour() >= OPEN_HOUR && cursor.hour() < CLOSE_HOUR;
        let on_weekday = weekday != Weekday::Sat && weekday != Weekday::Sun;

        if in_hours && on_weekday {
            let end = cursor + Duration::hours(1);
            slots.push(SlotProposal {
                start: cursor,
                end,
                label: cursor.format("%A %B %-d, %-I %p").to_string(),
            });
            cursor = end;
        } else if cursor.hour() >= CLOSE_HOUR || !on_weekday {
            // Jump to opening time of the next day.
            let next_day = (cursor + Duration::days(1)).date_naive();
            cursor = Utc
                .from_utc_datetime(
                    &next_day
                        .and_hms_opt(OPEN_HOUR, 0, 0)
                        .unwrap_or(next_day.and_time(Default::default())),
                )
                .with_timezone(&Utc);
        } else {
            // Before opening: jump to today's opening time.
            cursor = cursor
                .with_hour(OPEN_HOUR)
                .unwrap_or(cursor + Duration::hours(1));
        }
    }
    slots
}

/// HTTP-backed calendar client.
#[derive(Clone)]
pub struct HttpCalendar {
    client: reqwest::Client,
    base_url: String,
    token: String,
    calendar_id: String,
}

impl HttpCalendar {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        calendar_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            calendar_id: calendar_id.into(),
        }
    }
}

#[async_trait]
impl CalendarApi for HttpCalendar {
    async fn propose_slots(
        &self,
        now: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<SlotProposal>, ConnectError> {
        Ok(business_hour_slots(now, count))
    }

    async fn book_slot(
        &self,
        slot: &SlotProposal,
        summary: &str,
        attendee_email: Option<&str>,
    ) -> Result<Booking, ConnectError> {
        let mut body = json!({
            "summary": summary,
            "start": slot.start.to_rfc3339(),
            "end": slot.end.to_rfc3339(),
        });
        if let Some(email) = attendee_email {
            body["attendees"] = json!([{ "email": email }]);
        }

        let response = self
            .client
            .post(format!(
                "{}/calendars/{}/events",
                self.base_url, self.calendar_id
            ))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConnectError::from_response("calendar", response).await);
        }

        let event: Value = response.json().await?;
        let event_id = event
            .get("id")
            .and_then(Value::as_str)
            .ok_or(ConnectError::MalformedResponse {
                service: "calendar",
                field: "id",
            })?
            .to_string();
        let link = event
            .get("htmlLink")
            .and_then(Value::as_str)
            .map(str::to_string);

        tracing::info!(event_id = %event_id, start = %slot.start, "calendar event booked");
        Ok(Booking {
            event_id,
            link,
            start: slot.start,
            end: slot.end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slots_fall_within_business_hours_on_weekdays() {
        // A Monday morning.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 15, 0).unwrap();
        let slots = business_hour_slots(now, 12);
        assert_eq!(slots.len(), 12);
        for slot in &slots {
            assert!(slot.start.hour() >= OPEN_HOUR && slot.start.hour() < CLOSE_HOUR);
            assert_ne!(slot.start.weekday(), Weekday::Sat);
            assert_ne!(slot.start.weekday(), Weekday::Sun);
            assert_eq!(slot.end - slot.start, Duration::hours(1));
        }
    }

    #[test]
    fn slots_are_chronological_and_after_now() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 10, 40, 0).unwrap();
        let slots = business_hour_slots(now, 5);
        assert!(slots[0].start > now);
        for pair in slots.windows(2) {
            assert!(pair[0].start < pair[1].start);
        }
    }

    #[test]
    fn friday_evening_rolls_over_the_weekend() {
        // Friday 18:00: next slot must be Monday morning.
        let now = Utc.with_ymd_and_hms(2026, 3, 6, 18, 0, 0).unwrap();
        let slots = business_hour_slots(now, 1);
        assert_eq!(slots[0].start.weekday(), Weekday::Mon);
        assert_eq!(slots[0].start.hour(), OPEN_HOUR);
    }
}
