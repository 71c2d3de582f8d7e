use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use abapgen::failover::RetryPolicy;
use abapgen::{
    ArtifactKind, ArtifactName, ArtifactStore, AttemptResult, CancellationHandle
  , CancellationSignal, CollisionPolicy, EngineConfig, FailureKind
  , FsArtifactStore, GenerationFailure, GenerationOrchestrator
  , GenerationRequest, GenerationService, PipelineStage, Prompt
  , ProviderAdapter, ProviderFailure, ProviderRegistry, ProviderResponse
  , ResponseValidator, StorageFailure, StorageLocation, TemplateCatalog
  , ValidationDefect
};
use async_trait::async_trait;
use mockito::Server;
use serde_json::json;

const TAX_FUNCTION: &str = "\
FUNCTION z_tax_calculation.
*\"----------------------------------------------------------------------
*\"*\"Local Interface:
*\"  IMPORTING
*\"     VALUE(I_VBELN) TYPE CHAR10
*\"  EXPORTING
*\"     VALUE(E_RESULT) TYPE BAPIRET2
*\"----------------------------------------------------------------------
  IF i_vbeln IS INITIAL.
    e_result-type = 'E'.
    RETURN.
  ENDIF.
  e_result-type = 'S'.
ENDFUNCTION.
";

const CUSTOMER_STRUCTURE: &str = "\
TYPES: BEGIN OF zst_customer,
         kunnr TYPE kunnr,
         name1 TYPE name1_gp,
       END OF zst_customer.
";

fn init_logging()
{   let _ = env_logger::builder().is_test(true).try_init();
}

// ===== Test doubles =====

enum Step
{   Reply(ProviderResponse)
  , Hang
}

/// Adapter that plays back a fixed script and counts its calls
struct Scripted
{   name: String
  , script: Mutex<VecDeque<Step>>
  , calls: AtomicUsize
}

impl Scripted
{   fn new(name: &str, script: Vec<Step>) -> Arc<Self>
    {   Arc::new(Scripted
        {   name: name.to_string()
          , script: Mutex::new(script.into())
          , calls: AtomicUsize::new(0)
        })
    }

    fn replying(name: &str, replies: Vec<ProviderResponse>) -> Arc<Self>
    {   Self::new(name, replies.into_iter().map(Step::Reply).collect())
    }

    fn calls(&self) -> usize
    {   self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for Scripted
{   fn name(&self) -> &str
    {   &self.name
    }

    async fn send(&self, _prompt: &Prompt, _timeout: Duration) -> ProviderResponse
    {   self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().expect("script lock").pop_front();
        match step
        {   Some(Step::Reply(response)) => response
          , Some(Step::Hang) => std::future::pending().await
          , None => Err(ProviderFailure::EmptyResponse)
        }
    }
}

/// In-memory store keyed by directory and file name
#[derive(Default)]
struct MemoryStore
{   files: Mutex<HashMap<PathBuf, Vec<u8>>>
  , writes: AtomicUsize
}

impl MemoryStore
{   fn writes(&self) -> usize
    {   self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore
{   async fn store(
      &self
    , name: &ArtifactName
    , _kind: ArtifactKind
    , bytes: &[u8]
    ) -> Result<StorageLocation, StorageFailure>
    {   self.writes.fetch_add(1, Ordering::SeqCst);
        let path = PathBuf::from(&name.directory.0).join(&name.file_name);
        let mut files = self.files.lock().expect("files lock");
        if files.contains_key(&path)
        {   return Err(StorageFailure::Collision(path.display().to_string()));
        }
        files.insert(path.clone(), bytes.to_vec());
        Ok(StorageLocation(path))
    }

    async fn load(&self, location: &StorageLocation) -> Result<Vec<u8>, StorageFailure>
    {   self.files
          .lock()
          .expect("files lock")
          .get(location.path())
          .cloned()
          .ok_or_else(|| StorageFailure::NotFound(location.to_string()))
    }
}

fn orchestrator(
  adapters: Vec<Arc<dyn ProviderAdapter>>
, store: Arc<dyn ArtifactStore>
) -> GenerationOrchestrator
{   GenerationOrchestrator::new(
      Arc::new(TemplateCatalog::builtin().expect("catalog"))
    , Arc::new(ProviderRegistry::new(adapters).expect("registry"))
    , Arc::new(ResponseValidator::builtin().expect("validator"))
    , store
    )
    .with_retry_policy(RetryPolicy::new(3, 2.0, 0))
}

fn tax_request() -> GenerationRequest
{   GenerationRequest::new(ArtifactKind::FunctionModule, "tax calculation")
      .with_positionals(["I_VBELN:CHAR(10):I", "E_RESULT:BAPIRET2:E"])
}

// ===== Pipeline =====

#[tokio::test]
async fn test_falls_back_after_transient_failures_and_persists()
{   init_logging();
    let root = tempfile::tempdir().expect("tempdir");
    let primary = Scripted::replying("primary", vec![
      Err(ProviderFailure::RateLimited)
    , Err(ProviderFailure::RateLimited)
    , Err(ProviderFailure::Transport("connection reset".to_string()))
    ]);
    let secondary = Scripted::replying("secondary", vec![Ok(TAX_FUNCTION.to_string())]);
    let store = Arc::new(FsArtifactStore::new(root.path(), CollisionPolicy::Reject));
    let engine = orchestrator(vec![primary.clone(), secondary.clone()], store.clone());

    let generated = engine
      .generate(&tax_request(), &CancellationSignal::never())
      .await
      .expect("secondary should succeed");

    assert_eq!(primary.calls(), 3);
    assert_eq!(secondary.calls(), 1);
    assert_eq!(generated.artifact.provider_used(), "secondary");
    assert_eq!(generated.artifact.kind(), ArtifactKind::FunctionModule);
    assert_eq!(generated.attempts.len(), 4);
    assert_eq!(generated.attempts[3].result, AttemptResult::Accepted);
    assert!(generated.location.path().ends_with("output/z_fm_tax_calculation.abap"));

    let stored = store.load(&generated.location).await.expect("load");
    assert_eq!(stored, TAX_FUNCTION.as_bytes());
}

#[tokio::test]
async fn test_permanent_failures_exhaust_all_providers()
{   init_logging();
    let first = Scripted::replying("first", vec![Err(ProviderFailure::Unauthorized)]);
    let second = Scripted::replying("second", vec![Err(ProviderFailure::Unauthorized)]);
    let store = Arc::new(MemoryStore::default());
    let engine = orchestrator(vec![first.clone(), second.clone()], store.clone());

    let failure = engine
      .generate(&tax_request(), &CancellationSignal::never())
      .await
      .unwrap_err();

    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
    assert_eq!(store.writes(), 0);
    assert_eq!(
      failure,
      GenerationFailure::AllProvidersExhausted
      {   last_failure: Some(ProviderFailure::Unauthorized)
        , attempts: failure.attempts().to_vec()
      }
    );
    assert_eq!(failure.attempts()[0].provider, "first");
    assert_eq!(failure.attempts()[1].provider, "second");
}

#[tokio::test]
async fn test_missing_parameter_never_reaches_providers()
{   let adapter = Scripted::replying("only", vec![Ok(TAX_FUNCTION.to_string())]);
    let engine = orchestrator(vec![adapter.clone()], Arc::new(MemoryStore::default()));
    let request = GenerationRequest::new(ArtifactKind::FunctionModule, "tax calculation");

    let failure = engine
      .generate(&request, &CancellationSignal::never())
      .await
      .unwrap_err();

    assert_eq!(failure, GenerationFailure::MissingParameter { slot: "params".to_string() });
    assert_eq!(adapter.calls(), 0);
    assert!(failure.attempts().is_empty());
}

#[tokio::test]
async fn test_invalid_text_is_not_persisted_and_next_provider_runs()
{   init_logging();
    let sloppy = Scripted::replying("sloppy", vec![
      Ok("Here is your function module: it calculates tax.".to_string())
    ]);
    let careful = Scripted::replying("careful", vec![Ok(TAX_FUNCTION.to_string())]);
    let store = Arc::new(MemoryStore::default());
    let engine = orchestrator(vec![sloppy.clone(), careful.clone()], store.clone());

    let generated = engine
      .generate(&tax_request(), &CancellationSignal::never())
      .await
      .expect("careful provider should succeed");

    assert_eq!(sloppy.calls(), 1);
    assert_eq!(store.writes(), 1);
    assert_eq!(generated.artifact.provider_used(), "careful");
    assert!(matches!(
      generated.attempts[0].result,
      AttemptResult::Rejected(ValidationDefect::MissingMarker(_))
    ));
}

#[tokio::test]
async fn test_only_invalid_text_is_validation_exhausted()
{   let engine = orchestrator(
      vec![
        Scripted::replying("a", vec![Ok("FUNCTION z_x.\n".to_string())])
      , Scripted::replying("b", vec![Err(ProviderFailure::Timeout)])
      ]
    , Arc::new(MemoryStore::default())
    );
    let failure = engine
      .generate(&tax_request(), &CancellationSignal::never())
      .await
      .unwrap_err();
    assert_eq!(failure.kind(), FailureKind::ValidationExhausted);
    assert_eq!(failure.last_provider_failure(), Some(&ProviderFailure::Timeout));
}

#[tokio::test]
async fn test_collision_returns_validated_artifact()
{   let root = tempfile::tempdir().expect("tempdir");
    let existing = root.path().join("output").join("z_fm_tax_calculation.abap");
    std::fs::create_dir_all(existing.parent().expect("parent")).expect("mkdir");
    std::fs::write(&existing, "old").expect("seed file");

    let engine = orchestrator(
      vec![Scripted::replying("only", vec![Ok(TAX_FUNCTION.to_string())])]
    , Arc::new(FsArtifactStore::new(root.path(), CollisionPolicy::Reject))
    );
    let failure = engine
      .generate(&tax_request(), &CancellationSignal::never())
      .await
      .unwrap_err();

    assert!(matches!(
      failure,
      GenerationFailure::PersistenceFailed { failure: StorageFailure::Collision(_), .. }
    ));
    let artifact = failure.recovered_artifact().expect("artifact survives");
    assert_eq!(artifact.body(), TAX_FUNCTION);
    assert_eq!(std::fs::read_to_string(&existing).expect("read"), "old");
}

#[tokio::test]
async fn test_fenced_reply_is_stored_unwrapped()
{   let fenced = format!("```abap\n{}```", CUSTOMER_STRUCTURE);
    let store = Arc::new(MemoryStore::default());
    let engine = orchestrator(
      vec![Scripted::replying("only", vec![Ok(fenced)])]
    , store.clone()
    );
    let request = GenerationRequest::new(ArtifactKind::Structure, "customer")
      .with_positionals(["KUNNR", "NAME1"])
      .with_artifact_name("zst_customer.abap");

    let generated = engine
      .generate(&request, &CancellationSignal::never())
      .await
      .expect("structure should succeed");

    let stored = store.load(&generated.location).await.expect("load");
    assert_eq!(stored, CUSTOMER_STRUCTURE.trim_end().as_bytes());
}

#[tokio::test]
async fn test_enhancement_reply_with_prose_stores_code_only()
{   let code = "\
ENHANCEMENT 1 zei_credit_hold.
  IF vbak-kunnr IN lr_blocked.
    MESSAGE e001(zsd).
  ENDIF.
ENDENHANCEMENT.";
    let reply = format!(
      "Here is the implicit enhancement:\n```abap\n{}\n```\nActivate it in SE19.",
      code
    );
    let store = Arc::new(MemoryStore::default());
    let engine = orchestrator(
      vec![Scripted::replying("only", vec![Ok(reply)])]
    , store.clone()
    );
    let request = GenerationRequest::new(
      ArtifactKind::Enhancement,
      "block orders for customers on credit hold"
    )
    .with_named("base_object", "SAPMV45A")
    .with_named("enhancement_type", "Enhancement Point");

    let generated = engine
      .generate(&request, &CancellationSignal::never())
      .await
      .expect("enhancement should succeed");

    assert_eq!(generated.location.path(), PathBuf::from("output/z_enh_sapmv45a.abap"));
    let stored = store.load(&generated.location).await.expect("load");
    assert_eq!(stored, code.as_bytes());
}

// ===== Timing and cancellation =====

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_between_retries()
{   let adapter = Scripted::replying("slow", vec![
      Err(ProviderFailure::RateLimited)
    , Err(ProviderFailure::RateLimited)
    , Ok(CUSTOMER_STRUCTURE.to_string())
    ]);
    let engine = orchestrator(vec![adapter.clone()], Arc::new(MemoryStore::default()))
      .with_retry_policy(RetryPolicy::new(3, 2.0, 500));
    let request = GenerationRequest::new(ArtifactKind::Structure, "customer")
      .with_positional("KUNNR");

    let start = tokio::time::Instant::now();
    let generated = engine
      .generate(&request, &CancellationSignal::never())
      .await
      .expect("third attempt should succeed");

    assert_eq!(adapter.calls(), 3);
    assert!(start.elapsed() >= Duration::from_millis(1500));
    assert_eq!(generated.attempts.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_provider_times_out_then_falls_back()
{   let hanging = Scripted::new("hanging", vec![Step::Hang, Step::Hang, Step::Hang]);
    let backup = Scripted::replying("backup", vec![Ok(TAX_FUNCTION.to_string())]);
    let engine = orchestrator(
        vec![hanging.clone(), backup.clone()]
      , Arc::new(MemoryStore::default())
      )
      .with_per_attempt_timeout(Duration::from_secs(2));

    let generated = engine
      .generate(&tax_request(), &CancellationSignal::never())
      .await
      .expect("backup should succeed");

    assert_eq!(hanging.calls(), 3);
    assert!(generated.attempts[..3]
      .iter()
      .all(|a| a.result == AttemptResult::Failed(ProviderFailure::Timeout)));
    assert_eq!(generated.artifact.provider_used(), "backup");
}

#[tokio::test]
async fn test_cancel_during_dispatch_stops_without_persisting()
{   init_logging();
    let hanging = Scripted::new("hanging", vec![Step::Hang]);
    let backup = Scripted::replying("backup", vec![Ok(TAX_FUNCTION.to_string())]);
    let store = Arc::new(MemoryStore::default());
    let engine = Arc::new(orchestrator(vec![hanging.clone(), backup.clone()], store.clone()));
    let (handle, signal) = CancellationHandle::new();

    let task = {
      let engine = engine.clone();
      tokio::spawn(async move { engine.generate(&tax_request(), &signal).await })
    };
    while hanging.calls() == 0
    {   tokio::task::yield_now().await;
    }
    handle.cancel();

    let failure = tokio::time::timeout(Duration::from_secs(5), task)
      .await
      .expect("generate should return promptly")
      .expect("task should not panic")
      .unwrap_err();

    assert!(matches!(
      failure,
      GenerationFailure::Cancelled { stage: PipelineStage::Dispatching, .. }
    ));
    assert_eq!(backup.calls(), 0);
    assert_eq!(store.writes(), 0);
}

// ===== Service =====

#[tokio::test]
async fn test_service_runs_batch_concurrently()
{   init_logging();
    let root = tempfile::tempdir().expect("tempdir");
    let adapter = Scripted::replying("only", vec![
      Ok(CUSTOMER_STRUCTURE.to_string())
    , Ok(CUSTOMER_STRUCTURE.to_string())
    , Ok(CUSTOMER_STRUCTURE.to_string())
    ]);
    let engine = orchestrator(
      vec![adapter.clone()]
    , Arc::new(FsArtifactStore::new(root.path(), CollisionPolicy::VersionSuffix))
    );
    let service = GenerationService::new(Arc::new(engine));

    let requests = ["customers", "vendors", "materials"].map(|description| {
      GenerationRequest::new(ArtifactKind::Structure, description)
        .with_positional("KEY")
    });
    let replies = service.submit_all(requests).expect("submit");

    let mut locations = Vec::new();
    for mut reply in replies
    {   let generated = reply
          .recv()
          .await
          .expect("reply")
          .expect("generation should succeed");
        locations.push(generated.location);
    }
    locations.sort_by(|a, b| a.path().cmp(b.path()));
    locations.dedup();
    assert_eq!(locations.len(), 3);
    assert_eq!(adapter.calls(), 3);

    tokio_test::assert_ok!(service.shutdown().await);
}

// ===== HTTP end to end =====

#[tokio::test]
async fn test_from_config_over_http()
{   init_logging();
    let mut throttled = Server::new_async().await;
    let throttled_mock = throttled
      .mock("POST", "/chat/completions")
      .with_status(429)
      .with_body(r#"{"error":{"message":"slow down"}}"#)
      .expect(2)
      .create_async()
      .await;

    let mut healthy = Server::new_async().await;
    let healthy_mock = healthy
      .mock("POST", "/chat/completions")
      .match_header("authorization", "Bearer sk-test")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(json!({
        "choices": [{ "message": { "role": "assistant", "content": TAX_FUNCTION } }]
      }).to_string())
      .expect(1)
      .create_async()
      .await;

    let config = EngineConfig::from_json_str(&json!({
      "provider_priority": ["groq", "openai"],
      "providers": [
        { "name": "openai", "kind": "openai", "api_key": "sk-test", "endpoint": healthy.url() },
        { "name": "groq", "kind": "groq", "api_key": "gsk-test", "endpoint": throttled.url() },
        { "name": "arcee", "kind": "arcee" }
      ],
      "failover": {
        "max_attempts_per_provider": 2,
        "backoff_base_delay_ms": 10,
        "per_attempt_timeout_ms": 5000
      }
    }).to_string()).expect("config");

    let root = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FsArtifactStore::from_config(root.path(), &config));
    let engine = GenerationOrchestrator::from_config(&config, store.clone())
      .expect("engine");
    assert_eq!(engine.registry().names(), vec!["groq", "openai"]);

    let generated = engine
      .generate(&tax_request(), &CancellationSignal::never())
      .await
      .expect("openai should succeed");

    throttled_mock.assert_async().await;
    healthy_mock.assert_async().await;
    assert_eq!(generated.artifact.provider_used(), "openai");
    assert_eq!(
      store.load(&generated.location).await.expect("load"),
      TAX_FUNCTION.as_bytes()
    );
}

#[tokio::test]
async fn test_bad_request_is_not_retried()
{   init_logging();
    let mut refusing = Server::new_async().await;
    let refusing_mock = refusing
      .mock("POST", "/chat/completions")
      .with_status(400)
      .with_body(r#"{"error":{"message":"context length exceeded"}}"#)
      .expect(1)
      .create_async()
      .await;

    let mut healthy = Server::new_async().await;
    let healthy_mock = healthy
      .mock("POST", "/chat/completions")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(json!({
        "choices": [{ "message": { "role": "assistant", "content": TAX_FUNCTION } }]
      }).to_string())
      .expect(1)
      .create_async()
      .await;

    let config = EngineConfig::from_json_str(&json!({
      "provider_priority": ["groq", "openai"],
      "providers": [
        { "name": "groq", "kind": "groq", "api_key": "gsk-test", "endpoint": refusing.url() },
        { "name": "openai", "kind": "openai", "api_key": "sk-test", "endpoint": healthy.url() }
      ],
      "failover": {
        "max_attempts_per_provider": 3,
        "backoff_base_delay_ms": 10,
        "per_attempt_timeout_ms": 5000
      }
    }).to_string()).expect("config");

    let store = Arc::new(MemoryStore::default());
    let engine = GenerationOrchestrator::from_config(&config, store)
      .expect("engine");

    let generated = engine
      .generate(&tax_request(), &CancellationSignal::never())
      .await
      .expect("openai should succeed");

    refusing_mock.assert_async().await;
    healthy_mock.assert_async().await;
    assert_eq!(generated.attempts.len(), 2);
    assert_eq!(
      generated.attempts[0].result,
      AttemptResult::Failed(ProviderFailure::Rejected("HTTP 400 Bad Request".to_string()))
    );
    assert_eq!(generated.artifact.provider_used(), "openai");
}

#[tokio::test]
#[ignore]
async fn test_groq_live_generation()
{   let Ok(api_key) = std::env::var("GROQ_API_KEY")
    else
    {   println!("Skipping: GROQ_API_KEY not set");
        return;
    };
    init_logging();

    let config = EngineConfig::from_json_str(&json!({
      "providers": [{ "name": "groq", "kind": "groq", "api_key": api_key }]
    }).to_string()).expect("config");
    let root = tempfile::tempdir().expect("tempdir");
    let engine = GenerationOrchestrator::from_config(
        &config
      , Arc::new(FsArtifactStore::from_config(root.path(), &config))
      )
      .expect("engine");

    match engine.generate(&tax_request(), &CancellationSignal::never()).await
    {   Ok(generated) => {
          println!("Stored at {}", generated.location);
          println!("{}", generated.artifact.body());
        }
      , Err(e) => {
          println!("Generation failed: {}", e);
        }
    }
}
