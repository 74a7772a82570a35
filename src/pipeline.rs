//! Queue wiring for the storybook generation pipeline.
//!
//! The pipeline runs four independently bounded stages: story text,
//! illustrations, narration audio, and customer notifications. Each stage is
//! its own [`Queue`] so a burst of illustration work cannot starve
//! notifications. Construct one [`GenerationPipeline`] at application start
//! and pass it by reference to the code that enqueues work.

use std::time::Duration;

use crate::error::QueueError;
use crate::queue::{Queue, QueueConfig, QueueStats};

/// Well-known job types handled by the pipeline queues.
pub mod job_types {
    /// Generate the story text for a draft storybook.
    pub const STORY_TEXT: &str = "story.generate_text";
    /// Render one illustration for a story page.
    pub const ILLUSTRATION: &str = "story.generate_illustration";
    /// Synthesize narration audio for a finished story.
    pub const NARRATION: &str = "story.generate_narration";
    /// Send the delivery email after checkout.
    pub const DELIVERY_EMAIL: &str = "notify.delivery_email";
}

/// The four stage queues of the storybook generation pipeline.
///
/// Concurrency limits reflect the upstream rate limits of each stage's
/// collaborator: two parallel text generations, two illustration renders,
/// one narration synthesis, and five notification sends.
pub struct GenerationPipeline {
    pub story: Queue,
    pub illustration: Queue,
    pub narration: Queue,
    pub notification: Queue,
}

impl GenerationPipeline {
    /// Create the stage queues with their tuned limits and a daily retention
    /// sweep on each.
    ///
    /// # Errors
    ///
    /// Returns the first [`QueueError`] produced by queue construction.
    pub fn new() -> Result<Self, QueueError> {
        let sweep = Some(Duration::from_secs(60 * 60));
        Ok(Self {
            story: Queue::new(
                QueueConfig::new("story")
                    .with_concurrency(2)
                    .with_sweep_interval(sweep),
            )?,
            illustration: Queue::new(
                QueueConfig::new("illustration")
                    .with_concurrency(2)
                    .with_sweep_interval(sweep),
            )?,
            narration: Queue::new(
                QueueConfig::new("narration")
                    .with_concurrency(1)
                    .with_sweep_interval(sweep),
            )?,
            notification: Queue::new(
                QueueConfig::new("notification")
                    .with_concurrency(5)
                    .with_sweep_interval(sweep),
            )?,
        })
    }

    /// Stats for every stage queue, for the operational status endpoint.
    pub fn stats(&self) -> Vec<QueueStats> {
        vec![
            self.story.stats(),
            self.illustration.stats(),
            self.narration.stats(),
            self.notification.stats(),
        ]
    }

    /// Shut down all stage queues, draining in-flight jobs.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; remaining queues are still shut
    /// down.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        let mut first_err = None;
        for queue in [
            &self.story,
            &self.illustration,
            &self.narration,
            &self.notification,
        ] {
            if let Err(e) = queue.shutdown().await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnHandler;
    use crate::job::{JobOptions, JobStatus};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn pipeline_has_expected_stage_limits() {
        let pipeline = GenerationPipeline::new().unwrap();

        assert_eq!(pipeline.story.stats().concurrency, 2);
        assert_eq!(pipeline.illustration.stats().concurrency, 2);
        assert_eq!(pipeline.narration.stats().concurrency, 1);
        assert_eq!(pipeline.notification.stats().concurrency, 5);

        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stats_cover_every_stage() {
        let pipeline = GenerationPipeline::new().unwrap();

        let names: Vec<String> = pipeline.stats().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["story", "illustration", "narration", "notification"]);

        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stages_admit_work_independently() {
        let pipeline = GenerationPipeline::new().unwrap();
        pipeline.story.register_handler(
            job_types::STORY_TEXT,
            FnHandler::new(|payload: Value| async move { Ok(payload) }),
        );
        pipeline.notification.register_handler(
            job_types::DELIVERY_EMAIL,
            FnHandler::new(|payload: Value| async move { Ok(payload) }),
        );

        let story = pipeline.story.enqueue(
            job_types::STORY_TEXT,
            json!({"story_id": "s1"}),
            JobOptions::default(),
        );
        let email = pipeline.notification.enqueue(
            job_types::DELIVERY_EMAIL,
            json!({"order_id": "o1"}),
            JobOptions::default(),
        );

        for (queue, id) in [(&pipeline.story, &story.id), (&pipeline.notification, &email.id)] {
            loop {
                let job = queue.get_job(id).unwrap();
                if job.status.is_terminal() {
                    assert_eq!(job.status, JobStatus::Completed);
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }

        pipeline.shutdown().await.unwrap();
    }
}
