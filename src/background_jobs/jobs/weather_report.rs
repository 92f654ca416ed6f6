//! Periodic weather report jobs, one per frequency tier.

use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use crate::reports::ReportFanOut;
use crate::store::Frequency;
use std::sync::Arc;
use std::time::Duration;

pub struct WeatherReportJob {
    fanout: Arc<ReportFanOut>,
    frequency: Frequency,
    interval: Duration,
}

impl WeatherReportJob {
    pub fn new(fanout: Arc<ReportFanOut>, frequency: Frequency, interval: Duration) -> Self {
        Self {
            fanout,
            frequency,
            interval,
        }
    }
}

impl BackgroundJob for WeatherReportJob {
    fn id(&self) -> &'static str {
        match self.frequency {
            Frequency::Hourly => "weather_report_hourly",
            Frequency::Daily => "weather_report_daily",
        }
    }

    fn name(&self) -> &'static str {
        match self.frequency {
            Frequency::Hourly => "Hourly Weather Report",
            Frequency::Daily => "Daily Weather Report",
        }
    }

    fn description(&self) -> &'static str {
        match self.frequency {
            Frequency::Hourly => "Email current weather to confirmed hourly subscribers",
            Frequency::Daily => "Email current weather to confirmed daily subscribers",
        }
    }

    fn schedule(&self) -> JobSchedule {
        // Not at startup, so a restart does not send an extra report
        JobSchedule::delayed_interval(self.interval)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        self.fanout
            .run(self.frequency)
            .map(|_| ())
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))
    }
}
