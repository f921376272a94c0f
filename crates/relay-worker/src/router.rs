//! The dispatch pipeline: every gate a submitted request passes through
//! before (and around) its executor call, in the fixed order that makes
//! the audit trail meaningful — there is exactly one place a request can
//! be rejected for each reason.

use relay_executors::ExecutorRegistry;
use relay_policy::audit::{AuditLogger, AuditOutcome, AuditRecord};
use relay_policy::validator::SecurityViolation;
use relay_policy::{EmergencyStop, LockRegistry, RateLimiter, Validator};
use relay_protocol::{Request, Response, Tier};
use std::time::Instant;

pub struct Router {
    validator: Validator,
    emergency_stop: EmergencyStop,
    rate_limiter: RateLimiter,
    locks: LockRegistry,
    audit: AuditLogger,
    executors: ExecutorRegistry,
}

impl Router {
    pub fn new(
        validator: Validator,
        emergency_stop: EmergencyStop,
        rate_limiter: RateLimiter,
        locks: LockRegistry,
        audit: AuditLogger,
        executors: ExecutorRegistry,
    ) -> Self {
        Self {
            validator,
            emergency_stop,
            rate_limiter,
            locks,
            audit,
            executors,
        }
    }

    /// Shared handle the websocket dispatch loop flips on `emergency_stop`/
    /// `resume` control frames (spec §4.G, §5).
    pub fn emergency_stop(&self) -> &EmergencyStop {
        &self.emergency_stop
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let start = Instant::now();
        let mut params = request.params.clone();

        if !self.rate_limiter.acquire().await {
            self.audit.log(
                AuditRecord::new(request.request_id, &request.action, Tier::Blocked, AuditOutcome::RateLimited)
                    .with_task_id(request.task_id.clone()),
            );
            return Response::error(request.request_id, &request.action, "rate limit exceeded");
        }

        if let Err(violation) = self.validator.check_emergency_stop() {
            return self.reject(&request, violation, AuditOutcome::Blocked);
        }

        let tier = match self.validator.validate_action(&request.action) {
            Ok(tier) => tier,
            Err(violation) => return self.reject(&request, violation, AuditOutcome::Blocked),
        };

        if let Err(violation) = self.validator.validate_params(&params) {
            return self.reject(&request, violation, AuditOutcome::Blocked);
        }
        if let Err(violation) = self.validator.validate_path_params(&mut params) {
            return self.reject(&request, violation, AuditOutcome::Blocked);
        }

        if tier == Tier::Confirm && !request.confirmed {
            let approved = crate::approval::confirm(&request.action, request.request_id).await;
            if !approved {
                self.audit.log(
                    AuditRecord::new(request.request_id, &request.action, tier, AuditOutcome::DeniedByOperator)
                        .with_task_id(request.task_id.clone()),
                );
                return Response::error(request.request_id, &request.action, "denied by operator");
            }
        }

        let _lock = self.locks.acquire(&request.action, &params).await;

        let outcome = self.executors.dispatch(&request.action, &params).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                self.audit.log(
                    AuditRecord::new(request.request_id, &request.action, tier, AuditOutcome::Executed)
                        .with_task_id(request.task_id.clone())
                        .with_duration(duration_ms),
                );
                Response::success(request.request_id, &request.action, result)
            }
            Err(e) => {
                self.audit.log(
                    AuditRecord::new(request.request_id, &request.action, tier, AuditOutcome::InternalError)
                        .with_task_id(request.task_id.clone())
                        .with_reason(e.to_string())
                        .with_duration(duration_ms),
                );
                Response::error(request.request_id, &request.action, e.to_string())
            }
        }
    }

    fn reject(&self, request: &Request, violation: SecurityViolation, outcome: AuditOutcome) -> Response {
        self.audit.log(
            AuditRecord::new(request.request_id, &request.action, violation.tier(), outcome)
                .with_task_id(request.task_id.clone())
                .with_reason(violation.to_string()),
        );
        Response::error(request.request_id, &request.action, violation.to_string())
    }
}
