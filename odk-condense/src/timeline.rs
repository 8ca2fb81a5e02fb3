//! Timeline metrics engine
//!
//! Replays an instance's event stream in a single pass and accumulates
//! per-prompt timing and behavior metrics plus instance-level totals.
//!
//! Every gap between two consecutive events is attributed exactly once:
//! - to the current prompt as active time when the gap is below the break threshold
//! - to the current prompt as break time when the gap is at or above it
//! - to navigation time when no prompt is current
//!
//! so that `sum(active + break) + navigation == elapsed` holds for every log.
//!
//! Consecutive prompt entries within the screen grouping window are one screen
//! (a field list). A screen's time goes to the first of its prompts still open.

use crate::config::EngineConfig;
use crate::types::{Event, EventKind, Millis, PromptMetrics, Result, TimelineSummary};

/// Replays events into a [`TimelineSummary`]
#[derive(Debug, Clone)]
pub struct TimelineEngine {
    break_threshold_ms: Millis,
    long_interval_warning_ms: Millis,
    screen_group_ms: Millis,
    instance: String,
}

impl TimelineEngine {
    /// Create an engine using the thresholds from `config`
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            break_threshold_ms: config.break_threshold_ms,
            long_interval_warning_ms: config.long_interval_warning_ms,
            screen_group_ms: config.screen_group_ms,
            instance: String::new(),
        }
    }

    /// Builder method: override the break threshold
    pub fn with_break_threshold_ms(mut self, threshold: Millis) -> Self {
        self.break_threshold_ms = threshold;
        self
    }

    /// Builder method: name the instance in diagnostics
    pub fn for_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn break_threshold_ms(&self) -> Millis {
        self.break_threshold_ms
    }

    /// Replay an event stream
    ///
    /// Stops at the first error item; the partial metrics are discarded.
    pub fn replay<I>(&self, events: I) -> Result<TimelineSummary>
    where
        I: IntoIterator<Item = Result<Event>>,
    {
        let mut state = ReplayState::default();

        for event in events {
            let event = event?;
            self.advance_clock(&mut state, &event);
            self.apply(&mut state, event);
        }

        if !state.screen.is_empty() {
            log::trace!(
                "[{}] Closing open screen {:?} at end of log",
                self.instance,
                state.screen
            );
        }
        if state.paused_at.is_some() {
            log::debug!("[{}] Log ends while paused", self.instance);
        }

        let mut summary = state.summary;
        summary.total_active_time_ms = summary.prompts.values().map(|m| m.active_time_ms).sum();
        summary.total_break_time_ms = summary.prompts.values().map(|m| m.break_time_ms).sum();
        summary.elapsed_ms = match (state.first_time, state.last_time) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        };
        Ok(summary)
    }

    /// Attribute the gap since the previous event, then move the clock forward
    fn advance_clock(&self, state: &mut ReplayState, event: &Event) {
        let now = event.timestamp;
        let last = match state.last_time {
            Some(last) => last,
            None => {
                state.first_time = Some(now);
                state.last_time = Some(now);
                return;
            }
        };
        state.previous_time = Some(last);

        if now < last {
            log::warn!(
                "[{}] Out of order event {} ({} ms before the previous event)",
                self.instance,
                event,
                last - now
            );
            return;
        }

        let gap = now - last;
        if gap > self.long_interval_warning_ms {
            log::warn!(
                "[{}] Large interval ({} ms) before {}",
                self.instance,
                gap,
                event
            );
        }

        match state.screen.first() {
            Some(prompt) => {
                let metrics = state.summary.prompts.entry(prompt.clone()).or_default();
                if gap >= self.break_threshold_ms {
                    metrics.break_time_ms += gap;
                } else {
                    metrics.active_time_ms += gap;
                }
            }
            None => state.summary.navigation_time_ms += gap,
        }
        state.last_time = Some(now);
    }

    fn apply(&self, state: &mut ReplayState, event: Event) {
        let entering = matches!(event.kind, EventKind::EnterPrompt { .. });
        let summary = &mut state.summary;
        match event.kind {
            EventKind::EnterPrompt { prompt } => {
                summary.prompts.entry(prompt.clone()).or_default().visits += 1;
                let same_screen = state.joinable
                    && !state.screen.is_empty()
                    && event
                        .timestamp
                        .checked_sub(state.screen_opened_at)
                        .is_some_and(|since| since <= self.screen_group_ms);
                if same_screen {
                    if !state.screen.contains(&prompt) {
                        state.screen.push(prompt);
                    }
                } else {
                    summary.screen_count += 1;
                    state.screen = vec![prompt];
                    state.screen_opened_at = event.timestamp;
                }
            }
            EventKind::ExitPrompt { prompt } => {
                match state.screen.iter().position(|p| *p == prompt) {
                    Some(idx) => {
                        state.screen.remove(idx);
                    }
                    None if state.screen.is_empty() => log::debug!(
                        "[{}] Exit for {} without an open prompt at line {}",
                        self.instance,
                        prompt,
                        event.line
                    ),
                    None => {
                        log::warn!(
                            "[{}] Unmatched enter/exit: {:?} is current, exit for {} at line {}",
                            self.instance,
                            state.screen,
                            prompt,
                            event.line
                        );
                        state.screen.clear();
                    }
                }
                summary.prompts.entry(prompt).or_default();
            }
            EventKind::ConstraintViolation { prompt } => {
                prompt_entry(summary, prompt).constraint_count += 1;
            }
            EventKind::AnswerChange { prompt, .. } => {
                prompt_entry(summary, prompt).change_count += 1;
            }
            EventKind::Swipe { .. } => summary.total_swipe_events += 1,
            EventKind::Pause => {
                if state.paused_at.is_some() {
                    log::warn!(
                        "[{}] Pause without resume at line {}",
                        self.instance,
                        event.line
                    );
                } else {
                    state.paused_at = Some(event.timestamp);
                }
                state.resumed = false;
            }
            EventKind::Resume => {
                match state.paused_at.take() {
                    Some(paused_at) => {
                        summary.total_paused_time_ms += event.timestamp.saturating_sub(paused_at);
                    }
                    // Resumed twice: the app was left without logging a pause,
                    // so assume one just after the previous event
                    None if state.resumed => {
                        let paused_at = state.previous_time.map_or(event.timestamp, |t| t + 1);
                        log::warn!(
                            "[{}] Resume without pause at line {}; assuming a pause at {}",
                            self.instance,
                            event.line,
                            paused_at
                        );
                        summary.total_paused_time_ms += event.timestamp.saturating_sub(paused_at);
                    }
                    None => {}
                }
                state.resumed = true;
            }
            EventKind::SaveForm => summary.save_count += 1,
            EventKind::RelationSelfDestruct => summary.relation_self_destruct += 1,
            EventKind::Other { .. } => {}
        }
        state.joinable = entering;
    }
}

fn prompt_entry(summary: &mut TimelineSummary, prompt: String) -> &mut PromptMetrics {
    summary.prompts.entry(prompt).or_default()
}

#[derive(Debug, Default)]
struct ReplayState {
    /// Prompts open on the current screen, in entry order
    screen: Vec<String>,
    screen_opened_at: Millis,
    /// The previous event entered a prompt
    joinable: bool,
    first_time: Option<Millis>,
    /// Latest timestamp seen so far
    last_time: Option<Millis>,
    /// Clock value before the current event
    previous_time: Option<Millis>,
    paused_at: Option<Millis>,
    /// A resume has been seen with no pause after it
    resumed: bool,
    summary: TimelineSummary,
}
