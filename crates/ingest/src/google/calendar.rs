//! Calendar API client

use chrono::{DateTime, NaiveDate, Utc};

use super::api::{CalendarListResponse, Event, EventTime, EventsResponse};
use super::http::{GoogleHttp, endpoint};
use super::{decode, parse_timestamp};
use crate::error::ApiError;
use crate::models::{CalendarEvent, format_time};
use crate::remote::{CalendarApi, EventPage, EventQuery, Page};

pub struct CalendarClient {
    http: GoogleHttp,
    page_size: u32,
}

impl CalendarClient {
    const BASE_URL: &'static str = "https://www.googleapis.com/calendar/v3";

    pub fn new(http: GoogleHttp, page_size: u32) -> Self {
        Self { http, page_size }
    }
}

impl CalendarApi for CalendarClient {
    fn list_calendars(&self, subject: &str, page_token: Option<&str>) -> Result<Page<String>, ApiError> {
        let mut query = vec![("minAccessRole", "reader")];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let url = endpoint(Self::BASE_URL, &["users", "me", "calendarList"], &query)?;
        let list: CalendarListResponse = self.http.get_json(subject, &url)?;
        Ok(Page {
            items: list.items.unwrap_or_default().into_iter().map(|c| c.id).collect(),
            next_page_token: list.next_page_token,
        })
    }

    fn list_events(
        &self,
        subject: &str,
        calendar_id: &str,
        query: EventQuery<'_>,
        page_token: Option<&str>,
    ) -> Result<EventPage, ApiError> {
        let max = self.page_size.clamp(1, 2500).to_string();
        let time_min;
        let mut params = vec![("maxResults", max.as_str()), ("showDeleted", "true")];
        match query {
            EventQuery::Incremental { sync_token } => params.push(("syncToken", sync_token)),
            EventQuery::Initial { time_min: since } => {
                time_min = format_time(since);
                // orderBy=startTime requires expanded recurring events
                params.extend([
                    ("timeMin", time_min.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                ]);
            }
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        let url = endpoint(Self::BASE_URL, &["calendars", calendar_id, "events"], &params)?;
        let events: EventsResponse = self.http.get_json(subject, &url)?;
        events_page(calendar_id, events)
    }
}

fn events_page(calendar_id: &str, events: EventsResponse) -> Result<EventPage, ApiError> {
    let events_out = events
        .items
        .unwrap_or_default()
        .into_iter()
        .map(|raw| normalize_event(calendar_id, raw))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(EventPage {
        events: events_out,
        next_page_token: events.next_page_token,
        next_sync_token: events.next_sync_token,
    })
}

/// Normalize a Calendar API event into a mirrored record
pub(crate) fn normalize_event(calendar_id: &str, raw: serde_json::Value) -> Result<CalendarEvent, ApiError> {
    let event: Event = decode(&raw, "calendar event")?;
    Ok(CalendarEvent {
        calendar_id: calendar_id.to_string(),
        id: event.id,
        status: event.status,
        summary: event.summary,
        start: event.start.as_ref().and_then(event_time),
        end: event.end.as_ref().and_then(event_time),
        updated: event
            .updated
            .as_deref()
            .map(|u| parse_timestamp(u, "event updated"))
            .transpose()?,
        raw,
    })
}

/// All-day events carry a bare date; those are pinned to midnight UTC
fn event_time(time: &EventTime) -> Option<DateTime<Utc>> {
    if let Some(instant) = time.date_time.as_deref() {
        return DateTime::parse_from_rfc3339(instant)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    time.date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_events_page_normalizes_items() {
        let events: EventsResponse = serde_json::from_value(json!({
            "kind": "calendar#events",
            "items": [
                {
                    "id": "ev1",
                    "status": "confirmed",
                    "summary": "Standup",
                    "start": {"dateTime": "2024-03-01T09:00:00+01:00"},
                    "end": {"dateTime": "2024-03-01T09:15:00+01:00"},
                    "updated": "2024-02-20T10:00:00.000Z"
                },
                {"id": "ev2", "status": "cancelled"},
                {"id": "ev3", "start": {"date": "2024-03-04"}, "end": {"date": "2024-03-05"}}
            ],
            "nextSyncToken": "CPDAlvWDx70CEPDAlvWDx70CGAU="
        }))
        .unwrap();

        let page = events_page("primary", events).unwrap();

        assert_eq!(page.events.len(), 3);
        assert_eq!(page.next_page_token, None);
        assert_eq!(page.next_sync_token.as_deref(), Some("CPDAlvWDx70CEPDAlvWDx70CGAU="));
        let standup = &page.events[0];
        assert_eq!(standup.calendar_id, "primary");
        assert_eq!(
            standup.start.map(format_time).as_deref(),
            Some("2024-03-01T08:00:00.000Z")
        );
        assert_eq!(page.events[1].status.as_deref(), Some("cancelled"));
        assert_eq!(page.events[1].start, None);
        assert_eq!(
            page.events[2].start.map(format_time).as_deref(),
            Some("2024-03-04T00:00:00.000Z")
        );
    }

    #[test]
    fn test_bad_updated_timestamp_is_an_error() {
        let err = normalize_event("primary", json!({"id": "x", "updated": "yesterday"})).unwrap_err();
        assert!(matches!(err, ApiError::Other { .. }));
    }
}
