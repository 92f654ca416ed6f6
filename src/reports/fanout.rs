use crate::clock::Clock;
use crate::mail::{EmailComposer, MailTransport};
use crate::server::metrics;
use crate::store::{Frequency, UnitOfWork};
use crate::weather::{WeatherError, WeatherProvider, WeatherSnapshot};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutSummary {
    pub subscribers: usize,
    pub sent: usize,
    pub failed: usize,
    /// Subscribers whose city had no weather this run.
    pub skipped: usize,
    /// Distinct cities looked up.
    pub lookups: usize,
}

/// Sends one weather report to every confirmed subscriber of a frequency.
///
/// Weather is fetched at most once per distinct city per run, failed lookups
/// included. Nothing is retried: a failed lookup or send is logged and the run
/// moves on to the next subscriber.
pub struct ReportFanOut {
    uow: UnitOfWork,
    weather: Arc<dyn WeatherProvider>,
    mailer: Arc<dyn MailTransport>,
    composer: EmailComposer,
    clock: Arc<dyn Clock>,
}

impl ReportFanOut {
    pub fn new(
        uow: UnitOfWork,
        weather: Arc<dyn WeatherProvider>,
        mailer: Arc<dyn MailTransport>,
        composer: EmailComposer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            uow,
            weather,
            mailer,
            composer,
            clock,
        }
    }

    pub fn run(&self, frequency: Frequency) -> Result<FanOutSummary> {
        let subscriptions = self
            .uow
            .read(|repos| repos.confirmed_subscriptions(frequency))?;

        let mut summary = FanOutSummary {
            subscribers: subscriptions.len(),
            ..Default::default()
        };
        let mut cache: HashMap<String, Option<WeatherSnapshot>> = HashMap::new();

        for subscription in &subscriptions {
            let weather = cache
                .entry(subscription.city.clone())
                .or_insert_with(|| {
                    summary.lookups += 1;
                    self.lookup(&subscription.city)
                })
                .clone();

            let Some(weather) = weather else {
                summary.skipped += 1;
                continue;
            };

            let email = self
                .composer
                .report_email(subscription, &weather, self.clock.now());
            match self.mailer.send(&email) {
                Ok(()) => summary.sent += 1,
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        "Failed to send {} weather report to {}: {}",
                        frequency, subscription.email, err
                    );
                }
            }
        }

        metrics::record_report_emails(frequency.as_str(), "sent", summary.sent);
        metrics::record_report_emails(frequency.as_str(), "failed", summary.failed);
        metrics::record_report_emails(frequency.as_str(), "skipped", summary.skipped);

        info!(
            "{} weather reports: {} subscribers, {} sent, {} failed, {} skipped, {} cities",
            frequency,
            summary.subscribers,
            summary.sent,
            summary.failed,
            summary.skipped,
            summary.lookups
        );
        Ok(summary)
    }

    fn lookup(&self, city: &str) -> Option<WeatherSnapshot> {
        match self.weather.current_weather(city) {
            Ok(snapshot) => {
                metrics::record_weather_lookup("ok");
                Some(snapshot)
            }
            Err(err) => {
                let outcome = match &err {
                    WeatherError::CityNotFound(_) => "not_found",
                    _ => "error",
                };
                metrics::record_weather_lookup(outcome);
                warn!("Weather lookup for {} failed: {}", city, err);
                None
            }
        }
    }
}
