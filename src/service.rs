use std::sync::Arc;

use log::{debug, error, info, trace};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::GenerationFoot;
use crate::cancel::CancellationHandle;
use crate::orchestrator::GenerationOrchestrator;
use crate::request::GenerationRequest;

/// Public API for the generation engine - owns the task
pub struct GenerationService
{   hand: crate::GenerationHand
  , cancel: CancellationHandle
  , _task_handle: tokio::task::JoinHandle<()>
}

impl GenerationService
{   /// Create and spawn a new generation service
    /// Returns immediately - spawns background task
    pub fn new(orchestrator: Arc<GenerationOrchestrator>) -> Self
    {   debug!("Creating GenerationService with task ownership");

        let (submit_tx, submit_rx)
          = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx)
          = mpsc::unbounded_channel();

        let hand = crate::GenerationHand
        {   submit_tx
          , shutdown_tx
        };

        let foot = crate::GenerationFoot
        {   submit_rx
          , shutdown_rx
        };

        let cancel = CancellationHandle::new().0;
        let loop_cancel = cancel.clone();
        let _task_handle = tokio::spawn(async move {
          run_service_loop(foot, orchestrator, loop_cancel).await
        });

        GenerationService
        {   hand
          , cancel
          , _task_handle
        }
    }

    /// Queue a request - returns almost immediately
    pub fn submit(
      &self
    , request: GenerationRequest
    ) -> Result<
        mpsc::UnboundedReceiver<crate::SubmitReply>,
        crate::error::Error
      >
    {   debug!("submit queuing {} request", request.kind);
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::SubmitArgs
        {   request
          , reply: reply_tx
        };

        self.hand.submit_tx
          .send(cmd)
          .map_err(|_| {
            error!("Service channel closed");
            crate::error::Error::ServiceClosed
          })?;

        Ok(reply_rx)
    }

    /// Queue a batch; replies arrive in submission order
    pub fn submit_all(
      &self
    , requests: impl IntoIterator<Item = GenerationRequest>
    ) -> Result<
        Vec<mpsc::UnboundedReceiver<crate::SubmitReply>>,
        crate::error::Error
      >
    {   requests
          .into_iter()
          .map(|request| self.submit(request))
          .collect()
    }

    /// Cancel in-flight requests, then stop the service
    pub async fn shutdown(self)
      -> Result<(), crate::error::Error>
    {   debug!("Shutting down GenerationService");
        self.cancel.cancel();
        let (reply_tx, mut reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::ShutdownArgs
        {   reply: reply_tx
        };

        self.hand.shutdown_tx
          .send(cmd)
          .map_err(|_| {
            error!("Service channel already closed");
            crate::error::Error::ServiceClosed
          })?;

        // Wait for shutdown confirmation
        if let Some(result) = reply_rx.recv().await
        {   debug!("Service shutdown confirmed");
            result
        } else
        {   error!("Service shutdown timeout");
            Err(crate::error::Error::Timeout)
        }
    }
}

/// Main service event loop
///
/// tokio::select! only queues work: each request runs in its own task so
/// a slow provider never blocks the loop.
async fn run_service_loop(
  foot: GenerationFoot
, orchestrator: Arc<GenerationOrchestrator>
, cancel: CancellationHandle
)
{   debug!("Starting GenerationService event loop");
    let GenerationFoot
    {   mut submit_rx
      , mut shutdown_rx
    } = foot;
    let mut in_flight = JoinSet::new();

    loop
    { tokio::select!
      { Some(cmd) = submit_rx.recv() => {
          debug!("Received Submit for {}", cmd.request.kind);
          let orchestrator = orchestrator.clone();
          let signal = cancel.signal();
          in_flight.spawn(async move {
            let outcome = orchestrator.generate(&cmd.request, &signal).await;
            let _ = cmd.reply.send(outcome);
          });
        }
      , Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
          if let Err(e) = joined
          {   error!("Generation task failed: {}", e);
          } else
          {   trace!("{} generations still running", in_flight.len());
          }
        }
      , Some(cmd) = shutdown_rx.recv() => {
          debug!("Received Shutdown with {} in flight", in_flight.len());
          cancel.cancel();
          // queued submissions still get a (cancelled) reply
          while let Ok(queued) = submit_rx.try_recv()
          {   let orchestrator = orchestrator.clone();
              let signal = cancel.signal();
              in_flight.spawn(async move {
                let outcome = orchestrator.generate(&queued.request, &signal).await;
                let _ = queued.reply.send(outcome);
              });
          }
          while let Some(joined) = in_flight.join_next().await
          {   if let Err(e) = joined
              {   error!("Generation task failed: {}", e);
              }
          }
          let _ = cmd.reply.send(Ok(()));
          info!("GenerationService shutting down");
          break;
        }
      , else => {
          debug!("Service channels closed");
          break;
        }
      }
    }
}
