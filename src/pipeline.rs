//! Tiered judgment pipeline
//!
//! Decides the fate of one request: fast-path list checks first, then a
//! single-shot oracle judgment, then (only when warranted) the
//! tool-augmented review tier. Each escalation is strictly more
//! expensive than the last, and ambiguity always resolves toward
//! blocking.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::access::AccessControl;
use crate::cache::{format_few_shot, Example, ExampleStore};
use crate::decision::Decision;
use crate::error::Result;
use crate::items::Turn;
use crate::oracle::PolicyOracle;
use crate::reasoner::Reasoner;
use crate::request::RequestContext;
use crate::resilience::{invoke_with_retry, invoke_with_retry_repairing, RetryPolicy};

const REVIEW_PREAMBLE: &str = "You are the deep-review tier of an HTTP security gateway, \
called in for requests the first-tier judge could not classify. Use your tools to decode \
suspicious payloads and scan for injection signatures before deciding. When you have \
reached a verdict, answer with exactly one JSON object and nothing else: \
{\"action\": \"allow\"} or {\"action\": \"block\"}.";

/// Build the human prompt opening a review conversation.
pub fn review_prompt(summary: &str, few_shot: &[String]) -> String {
    let verdict_line = "Investigate this request and answer with {\"action\": \"allow\"} \
                        or {\"action\": \"block\"}.";
    if few_shot.is_empty() {
        format!("Incoming request context:\n{summary}\n\n{verdict_line}")
    } else {
        format!(
            "Previously labeled requests for reference:\n{}\n\nIncoming request context:\n{summary}\n\n{verdict_line}",
            format_few_shot(few_shot)
        )
    }
}

/// Final answer of the pipeline. Review is an internal escalation, never
/// an outcome: traffic is forwarded or it is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block,
}

/// The decision engine shared by every request handler.
pub struct Gatekeeper {
    access: Arc<AccessControl>,
    oracle: Arc<dyn PolicyOracle>,
    reasoner: Arc<dyn Reasoner>,
    examples: Arc<dyn ExampleStore>,
    retry: RetryPolicy,
    few_shot_k: usize,
}

impl Gatekeeper {
    pub fn new(
        access: Arc<AccessControl>,
        oracle: Arc<dyn PolicyOracle>,
        reasoner: Arc<dyn Reasoner>,
        examples: Arc<dyn ExampleStore>,
        retry: RetryPolicy,
        few_shot_k: usize,
    ) -> Self {
        Self {
            access,
            oracle,
            reasoner,
            examples,
            retry,
            few_shot_k,
        }
    }

    /// Judge one request. The deny-list wins over the allow-list; listed
    /// clients never reach a model. An error here means no judgment was
    /// reached at all, which the caller must not treat as an allow.
    pub async fn decide(&self, ctx: &RequestContext) -> Result<Verdict> {
        if self.access.contains_deny(&ctx.client) {
            info!(client = %ctx.client, "client on deny-list, blocking");
            return Ok(Verdict::Block);
        }
        if self.access.contains_allow(&ctx.client) {
            debug!(client = %ctx.client, "client on allow-list, forwarding");
            return Ok(Verdict::Allow);
        }

        let summary = ctx.summary();
        let reply =
            invoke_with_retry(&self.retry, || self.oracle.judge(&summary)).await?;
        match Decision::parse(&reply) {
            Ok(Decision::Allow) => {
                debug!(client = %ctx.client, "oracle allowed request");
                Ok(Verdict::Allow)
            }
            Ok(Decision::Block) => {
                info!(client = %ctx.client, "oracle blocked request");
                Ok(Verdict::Block)
            }
            Ok(Decision::Review) => {
                info!(client = %ctx.client, "oracle escalated to review");
                self.review(&summary).await
            }
            Err(error) => {
                // An unreadable first-tier verdict is treated as "unsure".
                warn!(%error, "oracle verdict unreadable, escalating to review");
                self.review(&summary).await
            }
        }
    }

    async fn review(&self, summary: &str) -> Result<Verdict> {
        let few_shot = match self.examples.query(summary, self.few_shot_k).await {
            Ok(blocks) => blocks,
            Err(error) => {
                warn!(%error, "example store query failed, reviewing without few-shot");
                Vec::new()
            }
        };

        let seed = Mutex::new(vec![
            Turn::system(REVIEW_PREAMBLE),
            Turn::human(review_prompt(summary, &few_shot)),
        ]);
        let outcome = invoke_with_retry_repairing(
            &self.retry,
            || {
                let turns = seed.lock().expect("seed lock poisoned").clone();
                self.reasoner.review(turns)
            },
            || {
                // A dangling tool reference means the tail of the seed no
                // longer pairs up; drop it and try again. The opening
                // system and human turns are never removed.
                let mut turns = seed.lock().expect("seed lock poisoned");
                if turns.len() > 2 {
                    turns.pop();
                }
            },
        )
        .await?;

        match Decision::parse(&outcome.verdict_text) {
            Ok(Decision::Allow) => {
                info!("review allowed request");
                Ok(Verdict::Allow)
            }
            Ok(Decision::Block) => {
                info!("review blocked request");
                self.remember_block(summary).await;
                Ok(Verdict::Block)
            }
            Ok(Decision::Review) => {
                // The review tier has no one left to escalate to.
                warn!("review tier punted, failing safe");
                Ok(Verdict::Block)
            }
            Err(error) => {
                warn!(%error, "review verdict unreadable, failing safe");
                Ok(Verdict::Block)
            }
        }
    }

    /// Persist a blocked request as a future few-shot example. The
    /// verdict stands whether or not the store cooperates.
    async fn remember_block(&self, summary: &str) {
        let example = Example {
            label: Decision::Block,
            reason: "flagged by deep review".to_string(),
            text: summary.to_string(),
        };
        match self.examples.store(&[example]).await {
            Ok(stored) => debug!(stored, "recorded blocked request as example"),
            Err(error) => warn!(%error, "failed to record blocked request"),
        }
    }
}
