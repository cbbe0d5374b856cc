//! Ordered interceptor folds.

use crate::bus::{ensure_req_id, BusClient, BusError, BusMessage};
use crate::error::GatewayError;

use super::rule::{InterceptorRule, Phase, RuleParseError};

/// Request- and response-phase interceptors, each sorted by ascending order.
#[derive(Debug)]
pub struct InterceptorChain {
    request: Vec<InterceptorRule>,
    response: Vec<InterceptorRule>,
    client: BusClient,
}

impl InterceptorChain {
    /// Split rules by phase. Rules with equal order keep their configured order.
    pub fn new(rules: Vec<InterceptorRule>, client: BusClient) -> Self {
        let (mut request, mut response): (Vec<_>, Vec<_>) =
            rules.into_iter().partition(|r| r.phase == Phase::Request);
        request.sort_by_key(|r| r.order);
        response.sort_by_key(|r| r.order);

        Self {
            request,
            response,
            client,
        }
    }

    /// Compile rule strings.
    pub fn from_config<S: AsRef<str>>(rules: &[S], client: BusClient) -> Result<Self, RuleParseError> {
        let rules = rules
            .iter()
            .map(|r| r.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules, client))
    }

    /// Run matching request interceptors. Each reply replaces the message;
    /// a reply marked `respond` ends the phase.
    pub async fn run_request_phase(
        &self,
        subject: &str,
        message: BusMessage,
    ) -> Result<BusMessage, BusError> {
        let rules: Vec<&InterceptorRule> =
            self.request.iter().filter(|r| r.matches(subject)).collect();
        self.fold(subject, &rules, message).await
    }

    /// Run matching response interceptors over the dispatch outcome.
    ///
    /// Failed outcomes only reach rules with `allowExceptions`; when none is
    /// eligible the original error is returned unchanged. `request` supplies
    /// the routing context interceptors get to see.
    pub async fn run_response_phase(
        &self,
        subject: &str,
        request: &BusMessage,
        outcome: Result<BusMessage, GatewayError>,
    ) -> Result<BusMessage, GatewayError> {
        let failed = outcome.is_err();
        let rules: Vec<&InterceptorRule> = self
            .response
            .iter()
            .filter(|r| r.matches(subject))
            .filter(|r| !failed || r.allow_exceptions())
            .collect();

        if rules.is_empty() {
            return outcome;
        }

        let mut message = match outcome {
            Ok(message) => message,
            Err(err) => err.to_message(&request.req_id, false),
        };
        message.query = request.query.clone();
        message.params = request.params.clone();
        message.path = request.path.clone();

        self.fold(subject, &rules, message)
            .await
            .map_err(GatewayError::from)
    }

    async fn fold(
        &self,
        subject: &str,
        rules: &[&InterceptorRule],
        mut message: BusMessage,
    ) -> Result<BusMessage, BusError> {
        let req_id = message.req_id.clone();

        for rule in rules {
            if message.is_respond() {
                break;
            }

            tracing::debug!(
                req_id = %req_id,
                subject = %subject,
                interceptor = %rule.target_subject,
                order = rule.order,
                phase = %rule.phase,
                "Invoking interceptor"
            );

            message = self.client.request(&rule.target_subject, message).await?;
            ensure_req_id(&mut message, &req_id);
        }

        Ok(message)
    }
}
