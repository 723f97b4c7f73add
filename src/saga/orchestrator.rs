use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::event;
use crate::domain::event::EventEnvelope;
use crate::domain::intent::{can_transition, CreateIntentRequest, IntentStatus, PaymentIntent};
use crate::domain::payment::{
    refund_allowed, CreatePaymentRequest, CreateRefundRequest, Payment, PaymentStatus, Refund,
};
use crate::error::CoreError;
use crate::ledger::Ledger;
use crate::rails::{RailCharge, RailChargeStatus, RailClient, RailError, RailReceipt};
use crate::repo::intents_repo::IntentsRepo;
use crate::repo::outbox_repo::OutboxRepo;
use crate::repo::payments_repo::PaymentsRepo;
use crate::repo::refunds_repo::RefundsRepo;
use crate::repo::saga_repo::SagaRepo;
use crate::risk::{RiskContext, RiskDecision, RiskEngine};
use crate::router::RailRouter;
use crate::saga::backoff::BackoffPolicy;
use crate::saga::{
    compensation_targets, recorded_charge, CompensationTarget, SagaInstance, SagaStatus, SagaStep,
    StepData,
};
use crate::service::idempotency::{Begin, IdempotencyStore};
use crate::service::webhook_dispatcher::WebhookDispatcher;

/// Drives a payment intent through its lifecycle:
/// risk -> route -> rail charge -> ledger post -> completed,
/// with reverse-order compensation on unrecoverable failure. Every step is
/// idempotent: re-entering with the same intent replays recorded results
/// instead of re-executing external effects.
#[derive(Clone)]
pub struct Orchestrator {
    pub pool: PgPool,
    pub intents_repo: IntentsRepo,
    pub payments_repo: PaymentsRepo,
    pub refunds_repo: RefundsRepo,
    pub saga_repo: SagaRepo,
    pub ledger: Ledger,
    pub idempotency: IdempotencyStore,
    pub router: Arc<RailRouter>,
    pub rails: Arc<HashMap<String, Arc<dyn RailClient>>>,
    pub risk: Arc<dyn RiskEngine>,
    pub webhooks: WebhookDispatcher,
    pub backoff: BackoffPolicy,
    pub rail_timeout_ms: u64,
    pub rail_max_attempts: u32,
}

impl Orchestrator {
    pub async fn create_intent(&self, req: CreateIntentRequest) -> Result<PaymentIntent, CoreError> {
        if req.amount_minor <= 0 {
            return Err(CoreError::Validation("amount_minor must be > 0".to_string()));
        }
        if req.currency.len() != 3 {
            return Err(CoreError::Validation("currency must be a 3-letter code".to_string()));
        }

        let now = Utc::now();
        let intent = PaymentIntent {
            id: Uuid::new_v4(),
            merchant_id: req.merchant_id,
            amount_minor: req.amount_minor,
            currency: req.currency.to_uppercase(),
            description: req.description,
            status: IntentStatus::Created,
            chosen_rail: None,
            risk_decision: None,
            metadata: req.metadata,
            created_at: now,
            expires_at: now + Duration::seconds(req.expires_in_secs.unwrap_or(900)),
        };

        self.intents_repo.insert(&intent).await.map_err(CoreError::Internal)?;
        self.emit(event::INTENT_CREATED, intent.id, serde_json::json!({ "intent_id": intent.id }))
            .await?;
        Ok(intent)
    }

    /// Executes the payment saga for an intent. Safe to call again for the
    /// same intent: completed work is replayed, not re-done.
    pub async fn execute_payment(&self, req: &CreatePaymentRequest) -> Result<Payment, CoreError> {
        let intent = self
            .intents_repo
            .find(req.intent_id)
            .await
            .map_err(CoreError::Internal)?
            .ok_or_else(|| CoreError::NotFound("payment intent".to_string()))?;

        // Finished resubmission: the recorded outcome is the response. A
        // non-terminal intent re-enters the saga instead, so interrupted
        // work (a crash between capture and ledger post, say) is finished
        // rather than short-circuited on the payment row's status alone.
        if intent.status.is_terminal() {
            return self
                .payments_repo
                .find_by_intent(intent.id)
                .await
                .map_err(CoreError::Internal)?
                .ok_or_else(|| {
                    CoreError::Validation(format!(
                        "intent is {} and cannot be paid",
                        intent.status.as_str()
                    ))
                });
        }
        if intent.status == IntentStatus::Created && Utc::now() > intent.expires_at {
            self.move_intent(&intent, intent.status, IntentStatus::Failed).await?;
            return Err(CoreError::Validation("payment intent has expired".to_string()));
        }

        let mut saga = match self
            .saga_repo
            .find_by_correlation(intent.id)
            .await
            .map_err(CoreError::Internal)?
        {
            Some(existing) => existing,
            None => {
                let fresh = SagaInstance::payment(intent.id);
                self.saga_repo.upsert(&fresh).await.map_err(CoreError::Internal)?;
                fresh
            }
        };

        match self.run_forward(&intent, &mut saga, req).await {
            Ok(payment) => Ok(payment),
            Err(err) => {
                // A failure after the intent reached Completed is
                // bookkeeping, not a forward step; unwinding a finished
                // payment would desync the ledger from the intent.
                let current = self.intents_repo.find(intent.id).await.ok().flatten();
                if current.map_or(false, |i| i.status == IntentStatus::Completed) {
                    return Err(err);
                }
                self.compensate(&intent, &mut saga, &err).await?;
                Err(err)
            }
        }
    }

    async fn run_forward(
        &self,
        intent: &PaymentIntent,
        saga: &mut SagaInstance,
        req: &CreatePaymentRequest,
    ) -> Result<Payment, CoreError> {
        // Step: risk.
        let assessment = self.step_risk(intent, saga).await?;
        if assessment == RiskDecision::Block {
            self.move_intent(intent, IntentStatus::RiskPending, IntentStatus::Failed).await?;
            saga.status = SagaStatus::Failed;
            self.saga_repo.upsert(saga).await.map_err(CoreError::Internal)?;
            self.emit_and_fan_out(
                event::INTENT_FAILED,
                intent.id,
                serde_json::json!({ "intent_id": intent.id, "reason": "RISK_BLOCKED" }),
            )
            .await?;
            return Err(CoreError::RiskBlocked);
        }

        // Step: route.
        let first_rail = self.step_route(intent, saga).await?;

        // Payment row, one per intent (unique constraint on intent_id).
        let payment = self.ensure_payment(intent, &first_rail).await?;

        // Step: rail charge, with health-aware re-routing between attempts.
        let (receipt, used_rail) = self.step_rail_charge(intent, saga, &payment, req, &first_rail).await?;

        self.payments_repo
            .record_outcome(
                payment.id,
                PaymentStatus::Succeeded,
                Some(&receipt.external_ref),
                None,
                None,
                Some(receipt.processed_at),
            )
            .await
            .map_err(CoreError::Internal)?;
        self.move_intent(intent, IntentStatus::RailPending, IntentStatus::Captured).await?;

        // Step: ledger post. Transaction id is the payment id, so the
        // storage-layer uniqueness guard caps the intent at one terminal
        // ledger effect no matter how many times we re-enter.
        let entries = self
            .ledger
            .capture_entries(payment.id, intent.merchant_id, intent.amount_minor, &intent.currency);
        match self.ledger.post(payment.id, intent.id, &entries).await {
            Ok(()) => {}
            Err(CoreError::DuplicateTransaction(_)) => {
                tracing::info!(intent_id = %intent.id, "ledger posting already present, replaying");
            }
            Err(err) => return Err(err),
        }
        saga.record(SagaStep::LedgerPost, StepData::LedgerPost { transaction_id: payment.id });
        self.saga_repo.upsert(saga).await.map_err(CoreError::Internal)?;
        self.move_intent(intent, IntentStatus::Captured, IntentStatus::LedgerPosted).await?;

        // Step: finalize. The Completed transition and the success event
        // commit in one transaction, so a Completed intent always has its
        // payment.succeeded event on record.
        self.finalize_payment(
            intent,
            serde_json::json!({
                "intent_id": intent.id,
                "payment_id": payment.id,
                "rail": used_rail,
                "external_ref": receipt.external_ref,
                "amount_minor": intent.amount_minor,
                "currency": intent.currency,
            }),
        )
        .await?;
        saga.current_step = SagaStep::Finalize.ordinal() + 1;
        saga.status = SagaStatus::Completed;
        self.saga_repo.upsert(saga).await.map_err(CoreError::Internal)?;

        self.payments_repo
            .find(payment.id)
            .await
            .map_err(CoreError::Internal)?
            .ok_or_else(|| CoreError::NotFound("payment".to_string()))
    }

    /// Moves the intent to Completed and writes the payment.succeeded
    /// outbox event in the same transaction. Webhook fan-out failures are
    /// retried and at worst logged; delivery rows can be recreated through
    /// replay, so they never unwind a finished payment.
    async fn finalize_payment(
        &self,
        intent: &PaymentIntent,
        data: serde_json::Value,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| CoreError::Internal(e.into()))?;
        let moved = IntentsRepo::transition_tx(
            &mut tx,
            intent.id,
            IntentStatus::LedgerPosted,
            IntentStatus::Completed,
        )
        .await
        .map_err(CoreError::Internal)?;
        if !moved {
            // Another run already completed the intent, and with it the
            // event; committing a duplicate here would double-announce.
            tx.rollback().await.map_err(|e| CoreError::Internal(e.into()))?;
            tracing::debug!(intent_id = %intent.id, "intent already completed");
            return Ok(());
        }
        let envelope = OutboxRepo::insert_tx(&mut tx, event::PAYMENT_SUCCEEDED, intent.id, data)
            .await
            .map_err(CoreError::Internal)?;
        tx.commit().await.map_err(|e| CoreError::Internal(e.into()))?;

        for attempt in 0..3u32 {
            match self.webhooks.fan_out(&envelope).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(intent_id = %intent.id, attempt, "webhook fan-out failed: {}", err);
                    tokio::time::sleep(self.backoff.jittered(attempt)).await;
                }
            }
        }
        tracing::error!(
            intent_id = %intent.id,
            event_id = %envelope.event_id,
            "webhook fan-out exhausted; deliveries need replay"
        );
        Ok(())
    }

    async fn step_risk(
        &self,
        intent: &PaymentIntent,
        saga: &mut SagaInstance,
    ) -> Result<RiskDecision, CoreError> {
        self.move_intent(intent, IntentStatus::Created, IntentStatus::RiskPending).await?;

        let key = step_key(intent.id, SagaStep::Risk);
        let hash = IdempotencyStore::hash_body(intent.id.as_bytes());
        let assessment = match self.idempotency.begin(&key, &hash).await? {
            Begin::Replay(cached) => {
                serde_json::from_value(cached.body).map_err(|e| CoreError::Internal(e.into()))?
            }
            // Assessment is deterministic and side-effect free, so a stale
            // in-flight reservation from a crashed run is simply overwritten.
            Begin::Fresh | Begin::InFlight => {
                let ctx = RiskContext {
                    intent_id: intent.id,
                    merchant_id: intent.merchant_id,
                    amount_minor: intent.amount_minor,
                    currency: intent.currency.clone(),
                };
                let assessment = self.risk.assess(&ctx).await.map_err(CoreError::Internal)?;
                self.idempotency
                    .complete(&key, 200, serde_json::to_value(&assessment).map_err(|e| CoreError::Internal(e.into()))?)
                    .await?;
                assessment
            }
        };

        self.intents_repo
            .set_risk_decision(intent.id, assessment.decision.as_str())
            .await
            .map_err(CoreError::Internal)?;
        saga.record(SagaStep::Risk, StepData::Risk {
            decision: assessment.decision.as_str().to_string(),
            score: assessment.score,
        });
        self.saga_repo.upsert(saga).await.map_err(CoreError::Internal)?;
        Ok(assessment.decision)
    }

    async fn step_route(
        &self,
        intent: &PaymentIntent,
        saga: &mut SagaInstance,
    ) -> Result<String, CoreError> {
        let rail = self.router.select_rail()?;
        self.intents_repo
            .set_chosen_rail(intent.id, &rail)
            .await
            .map_err(CoreError::Internal)?;
        self.move_intent(intent, IntentStatus::RiskPending, IntentStatus::Routed).await?;
        saga.record(SagaStep::Route, StepData::Route { rail: rail.clone() });
        self.saga_repo.upsert(saga).await.map_err(CoreError::Internal)?;
        Ok(rail)
    }

    async fn ensure_payment(&self, intent: &PaymentIntent, rail: &str) -> Result<Payment, CoreError> {
        if let Some(existing) = self
            .payments_repo
            .find_by_intent(intent.id)
            .await
            .map_err(CoreError::Internal)?
        {
            return Ok(existing);
        }
        let payment = Payment {
            id: Uuid::new_v4(),
            intent_id: intent.id,
            amount_minor: intent.amount_minor,
            currency: intent.currency.clone(),
            status: PaymentStatus::Processing,
            rail: rail.to_string(),
            rail_reference: None,
            failure_code: None,
            failure_message: None,
            processed_at: None,
            settled_at: None,
            created_at: Utc::now(),
        };
        self.payments_repo.insert(&payment).await.map_err(CoreError::Internal)?;
        Ok(payment)
    }

    async fn step_rail_charge(
        &self,
        intent: &PaymentIntent,
        saga: &mut SagaInstance,
        payment: &Payment,
        req: &CreatePaymentRequest,
        first_rail: &str,
    ) -> Result<(RailReceipt, String), CoreError> {
        self.move_intent(intent, IntentStatus::Routed, IntentStatus::RailPending).await?;

        // Replay: a prior run already captured on a rail.
        if let Some((rail, external_ref)) = recorded_charge(&saga.step_data) {
            return Ok((
                RailReceipt {
                    external_ref,
                    processed_at: Utc::now(),
                },
                rail,
            ));
        }

        let mut rail = first_rail.to_string();
        let mut last_err: Option<RailError> = None;

        for attempt in 0..self.rail_max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff.jittered(attempt - 1)).await;
                // Re-route: the failing rail may be ejected by now.
                rail = self.router.select_rail()?;
            }

            let client = self
                .rails
                .get(&rail)
                .cloned()
                .ok_or_else(|| CoreError::Internal(anyhow::anyhow!("no client for rail {rail}")))?;

            // The hold is on record before the wire call, so compensation
            // releases the reference even when the charge's outcome is
            // never resolved (timeout, crash mid-call, reconcile failure).
            saga.record(SagaStep::RailCharge, StepData::RailHold {
                rail: rail.clone(),
                attempt,
            });
            self.saga_repo.upsert(saga).await.map_err(CoreError::Internal)?;

            // One reference per (intent, attempt): a network-level retry of
            // the same attempt dedups on the rail side.
            let charge = RailCharge {
                payment_id: payment.id,
                amount_minor: intent.amount_minor,
                currency: intent.currency.clone(),
                merchant_id: intent.merchant_id,
                idempotency_reference: format!("{}:{}", intent.id, attempt),
                rail_data: req.rail_data.clone(),
            };

            let started = std::time::Instant::now();
            let outcome = self.charge_once(client.as_ref(), &charge).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(receipt) => {
                    self.router.record_outcome(&rail, true, latency_ms);
                    saga.record(SagaStep::RailCharge, StepData::RailCharge {
                        rail: rail.clone(),
                        external_ref: receipt.external_ref.clone(),
                        attempt,
                    });
                    self.saga_repo.upsert(saga).await.map_err(CoreError::Internal)?;
                    return Ok((receipt, rail));
                }
                Err(err) => {
                    self.router.record_outcome(&rail, false, latency_ms);
                    if !err.retryable {
                        self.fail_payment(intent, payment, &err).await?;
                        return Err(CoreError::Rail {
                            rail,
                            code: err.code,
                            message: err.message,
                            retryable: false,
                        });
                    }
                    tracing::warn!(
                        intent_id = %intent.id,
                        rail = %rail,
                        attempt,
                        "transient rail failure: {}",
                        err
                    );
                    last_err = Some(err);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| RailError::transient("RAIL_EXHAUSTED", "no attempts made"));
        self.fail_payment(intent, payment, &err).await?;
        Err(CoreError::Rail {
            rail,
            code: err.code,
            message: err.message,
            retryable: true,
        })
    }

    /// One charge under a bounded timeout. A timeout is an unknown outcome:
    /// the rail is queried before any failure/retry decision, because a
    /// blind retry of a debit that actually landed is a double spend.
    async fn charge_once(
        &self,
        client: &dyn RailClient,
        charge: &RailCharge,
    ) -> Result<RailReceipt, RailError> {
        let timeout = std::time::Duration::from_millis(self.rail_timeout_ms);
        match tokio::time::timeout(timeout, client.authorize_and_capture(charge)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::warn!(
                    reference = %charge.idempotency_reference,
                    "rail charge timed out, reconciling"
                );
                for _ in 0..3 {
                    match client.query_status(&charge.idempotency_reference).await {
                        Ok(RailChargeStatus::Succeeded) => {
                            return Ok(RailReceipt {
                                external_ref: charge.idempotency_reference.clone(),
                                processed_at: Utc::now(),
                            })
                        }
                        Ok(RailChargeStatus::Failed) => {
                            return Err(RailError::transient("RAIL_TIMEOUT", "charge not accepted"))
                        }
                        Ok(RailChargeStatus::Pending) | Ok(RailChargeStatus::Unknown) | Err(_) => {
                            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                        }
                    }
                }
                // Still unknown. Refusing to guess: surface a non-retryable
                // failure so compensation releases any hold.
                Err(RailError::permanent("RAIL_OUTCOME_UNKNOWN", "charge outcome unresolved"))
            }
        }
    }

    async fn fail_payment(
        &self,
        intent: &PaymentIntent,
        payment: &Payment,
        err: &RailError,
    ) -> Result<(), CoreError> {
        self.payments_repo
            .record_outcome(
                payment.id,
                PaymentStatus::Failed,
                None,
                Some(&err.code),
                Some(&err.message),
                None,
            )
            .await
            .map_err(CoreError::Internal)?;
        self.emit_and_fan_out(
            event::PAYMENT_FAILED,
            intent.id,
            serde_json::json!({
                "intent_id": intent.id,
                "payment_id": payment.id,
                "failure_code": err.code,
                "failure_message": err.message,
            }),
        )
        .await?;
        Ok(())
    }

    /// Runs compensations in reverse step order, then parks the intent in
    /// Failed, or CompensationFailed when a compensation itself breaks.
    async fn compensate(
        &self,
        intent: &PaymentIntent,
        saga: &mut SagaInstance,
        cause: &CoreError,
    ) -> Result<(), CoreError> {
        if matches!(cause, CoreError::RiskBlocked) {
            // Already terminal; nothing external happened.
            return Ok(());
        }

        saga.status = SagaStatus::Compensating;
        self.saga_repo.upsert(saga).await.map_err(CoreError::Internal)?;

        let mut compensation_failed = false;
        for target in compensation_targets(&saga.step_data) {
            let result = match &target {
                CompensationTarget::ReverseLedger { transaction_id } => {
                    self.compensate_ledger(intent, *transaction_id).await
                }
                CompensationTarget::ReleaseRail { rail, attempt } => {
                    self.compensate_rail(intent, rail, *attempt).await
                }
            };

            match result {
                Ok(()) => {
                    saga.step_data.push(StepData::Compensation {
                        of_step: target.label().to_string(),
                        note: "compensated".to_string(),
                    });
                }
                Err(err) => {
                    tracing::error!(intent_id = %intent.id, "compensation failed: {}", err);
                    compensation_failed = true;
                    break;
                }
            }
        }

        let current = self
            .intents_repo
            .find(intent.id)
            .await
            .map_err(CoreError::Internal)?
            .map(|i| i.status)
            .unwrap_or(intent.status);

        if compensation_failed {
            saga.status = SagaStatus::CompensationFailed;
            self.saga_repo.upsert(saga).await.map_err(CoreError::Internal)?;
            if !current.is_terminal() {
                self.move_intent(intent, current, IntentStatus::CompensationFailed).await?;
            }
            self.emit_and_fan_out(
                event::COMPENSATION_FAILED,
                intent.id,
                serde_json::json!({ "intent_id": intent.id }),
            )
            .await?;
            return Err(CoreError::SagaCompensationFailure(intent.id));
        }

        saga.status = SagaStatus::Compensated;
        self.saga_repo.upsert(saga).await.map_err(CoreError::Internal)?;
        if !current.is_terminal() {
            self.move_intent(intent, current, IntentStatus::Failed).await?;
        }
        Ok(())
    }

    async fn compensate_ledger(&self, intent: &PaymentIntent, transaction_id: Uuid) -> Result<(), CoreError> {
        let original = self
            .ledger
            .ledger_repo
            .entries_for_transaction(transaction_id)
            .await
            .map_err(CoreError::Internal)?;
        if original.is_empty() {
            return Ok(());
        }
        let reversal_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("reversal:{transaction_id}").as_bytes());
        let entries = self.ledger.offsetting_entries(reversal_id, &original);
        match self.ledger.post(reversal_id, intent.id, &entries).await {
            Ok(()) | Err(CoreError::DuplicateTransaction(_)) => {
                self.emit(
                    event::COMPENSATION_APPLIED,
                    intent.id,
                    serde_json::json!({
                        "intent_id": intent.id,
                        "reversed_transaction_id": transaction_id,
                        "reversal_transaction_id": reversal_id,
                    }),
                )
                .await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn compensate_rail(&self, intent: &PaymentIntent, rail: &str, attempt: u32) -> Result<(), CoreError> {
        let client = self
            .rails
            .get(rail)
            .cloned()
            .ok_or_else(|| CoreError::Internal(anyhow::anyhow!("no client for rail {rail}")))?;
        let reference = format!("{}:{}", intent.id, attempt);
        client
            .release(&reference)
            .await
            .map_err(|e| CoreError::Internal(anyhow::anyhow!("release failed: {e}")))?;
        self.emit(
            event::COMPENSATION_APPLIED,
            intent.id,
            serde_json::json!({ "intent_id": intent.id, "rail": rail, "released": reference }),
        )
        .await?;
        Ok(())
    }

    /// Cancellation is a narrow window: once a rail call may have moved
    /// money, the only way back is a refund.
    pub async fn cancel_intent(&self, intent_id: Uuid) -> Result<PaymentIntent, CoreError> {
        let intent = self
            .intents_repo
            .find(intent_id)
            .await
            .map_err(CoreError::Internal)?
            .ok_or_else(|| CoreError::NotFound("payment intent".to_string()))?;

        if !intent.status.can_cancel() {
            return Err(CoreError::Validation(format!(
                "intent in {} cannot be canceled",
                intent.status.as_str()
            )));
        }
        self.move_intent(&intent, intent.status, IntentStatus::Canceled).await?;
        self.emit_and_fan_out(
            event::INTENT_CANCELED,
            intent.id,
            serde_json::json!({ "intent_id": intent.id }),
        )
        .await?;
        self.intents_repo
            .find(intent_id)
            .await
            .map_err(CoreError::Internal)?
            .ok_or_else(|| CoreError::NotFound("payment intent".to_string()))
    }

    /// A refund is a new balanced transaction mirroring money back; the
    /// original posting is never touched.
    pub async fn execute_refund(&self, req: &CreateRefundRequest) -> Result<Refund, CoreError> {
        if req.amount_minor <= 0 {
            return Err(CoreError::Validation("amount_minor must be > 0".to_string()));
        }
        // Guard and reservation run under a payment-row lock, and pending
        // refunds count toward the reservation, so two concurrent refunds
        // cannot both take the last of the refundable capacity.
        let mut tx = self.pool.begin().await.map_err(|e| CoreError::Internal(e.into()))?;
        let payment = PaymentsRepo::lock_tx(&mut tx, req.payment_id)
            .await
            .map_err(CoreError::Internal)?
            .ok_or_else(|| CoreError::NotFound("payment".to_string()))?;
        if payment.status != PaymentStatus::Succeeded && payment.status != PaymentStatus::Refunded {
            return Err(CoreError::Validation("payment is not refundable".to_string()));
        }

        let reserved = RefundsRepo::reserved_total_tx(&mut tx, payment.id)
            .await
            .map_err(CoreError::Internal)?;
        if !refund_allowed(payment.amount_minor, reserved, req.amount_minor) {
            return Err(CoreError::Validation(format!(
                "refund exceeds remaining refundable amount {}",
                payment.amount_minor - reserved
            )));
        }

        let intent = self
            .intents_repo
            .find(payment.intent_id)
            .await
            .map_err(CoreError::Internal)?
            .ok_or_else(|| CoreError::NotFound("payment intent".to_string()))?;
        if !intent.status.can_refund() {
            return Err(CoreError::Validation(format!(
                "intent in {} cannot be refunded",
                intent.status.as_str()
            )));
        }

        let refund = Refund {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            amount_minor: req.amount_minor,
            currency: payment.currency.clone(),
            reason: req.reason.clone(),
            status: PaymentStatus::Pending,
            ledger_transaction_id: None,
            created_at: Utc::now(),
        };
        RefundsRepo::insert_tx(&mut tx, &refund).await.map_err(CoreError::Internal)?;
        tx.commit().await.map_err(|e| CoreError::Internal(e.into()))?;

        // A partial refund leaves the intent where it is so the remainder
        // stays refundable; only a full refund walks Refunding -> Refunded.
        let fully_refunded = reserved + req.amount_minor == payment.amount_minor;
        if fully_refunded {
            self.move_intent(&intent, intent.status, IntentStatus::Refunding).await?;
        }

        let entries = self
            .ledger
            .refund_entries(refund.id, intent.merchant_id, req.amount_minor, &payment.currency);
        match self.ledger.post(refund.id, intent.id, &entries).await {
            Ok(()) | Err(CoreError::DuplicateTransaction(_)) => {}
            Err(err) => {
                self.refunds_repo.mark_failed(refund.id).await.map_err(CoreError::Internal)?;
                if fully_refunded {
                    self.move_intent_current(intent.id, IntentStatus::CompensationFailed).await?;
                }
                return Err(err);
            }
        }

        self.refunds_repo
            .mark_succeeded(refund.id, refund.id)
            .await
            .map_err(CoreError::Internal)?;

        if fully_refunded {
            self.payments_repo
                .record_outcome(payment.id, PaymentStatus::Refunded, None, None, None, None)
                .await
                .map_err(CoreError::Internal)?;
            self.move_intent_current(intent.id, IntentStatus::Refunded).await?;
        }

        self.emit_and_fan_out(
            event::REFUND_SUCCEEDED,
            intent.id,
            serde_json::json!({
                "intent_id": intent.id,
                "payment_id": payment.id,
                "refund_id": refund.id,
                "amount_minor": req.amount_minor,
                "currency": payment.currency,
                "full": fully_refunded,
            }),
        )
        .await?;

        self.refunds_repo
            .find(refund.id)
            .await
            .map_err(CoreError::Internal)?
            .ok_or_else(|| CoreError::NotFound("refund".to_string()))
    }

    async fn move_intent(
        &self,
        intent: &PaymentIntent,
        from: IntentStatus,
        to: IntentStatus,
    ) -> Result<(), CoreError> {
        if !can_transition(from, to) {
            return Err(CoreError::Internal(anyhow::anyhow!(
                "illegal intent transition {} -> {} for {}",
                from.as_str(),
                to.as_str(),
                intent.id
            )));
        }
        let moved = self
            .intents_repo
            .transition(intent.id, from, to)
            .await
            .map_err(CoreError::Internal)?;
        if !moved {
            // Another worker advanced the intent; replay semantics make that
            // fine as long as the row is at or past `to`.
            tracing::debug!(intent_id = %intent.id, from = from.as_str(), to = to.as_str(), "transition already applied");
        }
        Ok(())
    }

    async fn move_intent_current(&self, intent_id: Uuid, to: IntentStatus) -> Result<(), CoreError> {
        let current = self
            .intents_repo
            .find(intent_id)
            .await
            .map_err(CoreError::Internal)?
            .ok_or_else(|| CoreError::NotFound("payment intent".to_string()))?;
        self.move_intent(&current, current.status, to).await
    }

    /// Writes an outbox event in its own transaction and returns the
    /// envelope (with its allocated per-aggregate version).
    async fn emit(
        &self,
        event_type: &str,
        aggregate_id: Uuid,
        data: serde_json::Value,
    ) -> Result<EventEnvelope, CoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| CoreError::Internal(e.into()))?;
        let envelope = OutboxRepo::insert_tx(&mut tx, event_type, aggregate_id, data)
            .await
            .map_err(CoreError::Internal)?;
        tx.commit().await.map_err(|e| CoreError::Internal(e.into()))?;
        Ok(envelope)
    }

    async fn emit_and_fan_out(
        &self,
        event_type: &str,
        aggregate_id: Uuid,
        data: serde_json::Value,
    ) -> Result<(), CoreError> {
        let envelope = self.emit(event_type, aggregate_id, data).await?;
        self.webhooks
            .fan_out(&envelope)
            .await
            .map_err(CoreError::Internal)?;
        Ok(())
    }
}

fn step_key(intent_id: Uuid, step: SagaStep) -> String {
    format!("saga:{}:{}:{}", intent_id, step.ordinal(), step.name())
}
