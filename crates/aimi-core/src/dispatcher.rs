//! The non-streaming action dispatcher.
//!
//! Handles one fully buffered block of model output. The batch runs through
//! a fixed pipeline:
//!
//!   Repair → Decode → Fabrication → Allow-list → Clock → Single-system → Append → Effect
//!
//! Per-record failures drop only the offending element; later elements in
//! the batch still run. A disallowed call or an undecodable batch ends the
//! whole response.

use tracing::{debug, info, warn};
use uuid::Uuid;

use aimi_contracts::{
    action::{ExecuteLevel, CHAT_FROM_PREFIX},
    error::AimiError,
    render::{FragmentKind, RenderFragment},
};

use crate::{
    context::TurnContext,
    effects::{apply, render_request},
    traits::BatchRepairer,
};

/// What one dispatched batch did.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub response_id: Uuid,
    pub fragments: Vec<RenderFragment>,
    /// Timestamps of the model records appended to the log, in batch order.
    /// Follow-up records are not listed.
    pub appended: Vec<u64>,
    /// Per-record errors. The records they name were dropped.
    pub rejected: Vec<AimiError>,
    /// The error that ended the batch early, if any.
    pub fatal: Option<AimiError>,
}

impl DispatchReport {
    fn new(response_id: Uuid) -> Self {
        Self {
            response_id,
            fragments: Vec::new(),
            appended: Vec::new(),
            rejected: Vec::new(),
            fatal: None,
        }
    }

    /// True when every element was accepted.
    pub fn is_ok(&self) -> bool {
        self.fatal.is_none() && self.rejected.is_empty()
    }

    fn reject(&mut self, index: usize, err: AimiError) {
        warn!(response_id = %self.response_id, index, error = %err, "element dropped");
        self.fragments.push(RenderFragment::diagnostic(&err));
        self.rejected.push(err);
    }

    fn fail(&mut self, err: AimiError) {
        warn!(response_id = %self.response_id, error = %err, "batch stopped");
        self.fragments.push(RenderFragment::diagnostic(&err));
        self.fragments.push(RenderFragment::continue_token());
        self.fatal = Some(err);
    }
}

/// Dispatches buffered batches through a repairer.
pub struct Dispatcher {
    repairer: Box<dyn BatchRepairer>,
}

impl Dispatcher {
    pub fn new(repairer: Box<dyn BatchRepairer>) -> Self {
        Self { repairer }
    }

    /// Decode `text` and dispatch every element in order.
    ///
    /// Never returns an error: everything that went wrong is in the report,
    /// and failed effects are in the log as error-result records.
    pub fn dispatch(&self, text: &str, ctx: &mut TurnContext<'_>) -> DispatchReport {
        let mut report = DispatchReport::new(Uuid::new_v4());
        debug!(response_id = %report.response_id, bytes = text.len(), "dispatch starting");

        // ── Step 1: Repair and decode ────────────────────────────────────────
        let elements = match self.repairer.decode(text, ctx.registry) {
            Ok(elements) => elements,
            Err(err) => {
                report.fail(err);
                return report;
            }
        };

        let mut clock = ctx.store.clock();
        let mut system_claimed = false;

        for (index, element) in elements.into_iter().enumerate() {
            let mut record = match element {
                Ok(record) => record,
                Err(err) => {
                    report.reject(index, err);
                    continue;
                }
            };

            // ── Step 2: Only the operator authors chat_from_ records ─────────
            if record.call.starts_with(CHAT_FROM_PREFIX) {
                report.reject(index, AimiError::FabricatedOperatorMessage { call: record.call });
                continue;
            }

            // ── Step 3: Allow-list; the registry decides the execute level ────
            let Some(level) = ctx.registry.execute_level(&record.call) else {
                report.fail(AimiError::DisallowedCall { call: record.call });
                break;
            };
            record.execute = level;

            // ── Step 4: Logical clock ────────────────────────────────────────
            if let Some(timestamp) = record.timestamp {
                if timestamp < clock {
                    report.reject(
                        index,
                        AimiError::StaleTimestamp {
                            call: record.call,
                            timestamp,
                            clock,
                        },
                    );
                    continue;
                }
                clock = timestamp + 1;
            }

            // ── Step 5: At most one system record per batch ──────────────────
            if level == ExecuteLevel::System {
                if system_claimed {
                    report.reject(index, AimiError::DuplicateSystemCall { call: record.call });
                    continue;
                }
                system_claimed = true;
            }

            // ── Step 6: Render, append, run the effect ───────────────────────
            if let Some(reasoning) = &record.reasoning {
                report
                    .fragments
                    .push(RenderFragment::new(FragmentKind::Reasoning, reasoning.clone()));
            }
            if let Some(fragment) = render_request(&record) {
                report.fragments.push(fragment);
            }

            let timestamp = ctx.store.append(record.clone());
            record.timestamp = Some(timestamp);
            report.appended.push(timestamp);
            debug!(
                response_id = %report.response_id,
                index,
                timestamp,
                call = %record.call,
                "element appended"
            );
            report.fragments.extend(apply(&record, ctx));
        }

        info!(
            response_id = %report.response_id,
            appended = report.appended.len(),
            rejected = report.rejected.len(),
            fatal = report.fatal.is_some(),
            "dispatch finished"
        );
        report
    }
}
