//! Outbound collaborator clients for frontdesk.
//!
//! Each external system sits behind an `async_trait` trait object so the
//! dispatch pipeline and relay depend on the seam, not the vendor: CRM
//! ([`CrmApi`]), calendar ([`CalendarApi`]), SMS ([`SmsApi`]), and operator
//! alerting ([`AlertApi`]). The HTTP implementations are thin reqwest
//! clients; tests drive the pipeline with in-memory mocks.

pub mod alerts;
pub mod calendar;
pub mod crm;
mod error;
pub mod sms;

pub use alerts::{AlertApi, WebhookAlerts};
pub use calendar::{business_hour_slots, CalendarApi, HttpCalendar};
pub use crm::{CrmApi, HttpCrm};
pub use error::ConnectError;
pub use sms::{SmsApi, SmsReceipt, TwilioSms};
