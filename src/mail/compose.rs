use super::OutgoingEmail;
use crate::store::Subscription;
use crate::weather::WeatherSnapshot;
use chrono::{DateTime, Utc};
use uuid::Uuid;

const CONFIRMATION_SUBJECT: &str = "Weather subscription confirmation";

/// Builds the HTML emails sent to subscribers.
#[derive(Debug, Clone)]
pub struct EmailComposer {
    base_url: String,
}

impl EmailComposer {
    /// `base_url` is the public address of this service. A bare host gets an
    /// `http://` prefix.
    pub fn new(base_url: &str) -> Self {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };
        Self { base_url }
    }

    pub fn confirmation_link(&self, token: Uuid) -> String {
        format!("{}/confirm/{}", self.base_url, token)
    }

    pub fn unsubscribe_link(&self, token: Uuid) -> String {
        format!("{}/unsubscribe/{}", self.base_url, token)
    }

    pub fn confirmation_email(&self, subscription: &Subscription, now: DateTime<Utc>) -> OutgoingEmail {
        let html_body = format!(
            "<html><body>\
             <h2>Confirm your weather subscription</h2>\
             <p>Hello {email},</p>\
             <p>You asked for {frequency} weather reports for <strong>{city}</strong> \
             on {date}. Each report covers the last {period}.</p>\
             <p><a href=\"{link}\">Confirm subscription</a></p>\
             <p>If you did not request this, you can ignore this email.</p>\
             </body></html>",
            email = escape_html(&subscription.email),
            frequency = subscription.frequency,
            city = escape_html(&upper_first_letter(&subscription.city)),
            date = long_date(now),
            period = subscription.frequency.report_period(),
            link = self.confirmation_link(subscription.token),
        );

        OutgoingEmail {
            to: subscription.email.clone(),
            subject: CONFIRMATION_SUBJECT.to_string(),
            html_body,
        }
    }

    pub fn report_email(
        &self,
        subscription: &Subscription,
        weather: &WeatherSnapshot,
        now: DateTime<Utc>,
    ) -> OutgoingEmail {
        let html_body = format!(
            "<html><body>\
             <h2>{title} weather report for {city}</h2>\
             <p>{full_date}, {time} UTC</p>\
             <p>{description}</p>\
             <ul>\
             <li>Temperature: {temperature:.2} &deg;C</li>\
             <li>Humidity: {humidity:.2} %</li>\
             </ul>\
             <p>Sent to {email} for {date}. \
             <a href=\"{link}\">Unsubscribe</a></p>\
             </body></html>",
            title = upper_first_letter(subscription.frequency.as_str()),
            city = escape_html(&upper_first_letter(&subscription.city)),
            full_date = now.format("%A, %B %-d, %Y"),
            time = now.format("%H:%M"),
            description = escape_html(&upper_first_letter(&weather.condition)),
            temperature = weather.temperature,
            humidity = weather.humidity,
            email = escape_html(&subscription.email),
            date = long_date(now),
            link = self.unsubscribe_link(subscription.token),
        );

        OutgoingEmail {
            to: subscription.email.clone(),
            subject: report_subject(&subscription.city),
            html_body,
        }
    }
}

pub fn report_subject(city: &str) -> String {
    format!("Weather report for {}", city)
}

fn long_date(at: DateTime<Utc>) -> String {
    at.format("%B %-d, %Y").to_string()
}

/// Uppercases the first character, leaving the rest untouched.
pub fn upper_first_letter(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
