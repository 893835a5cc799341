//! Step pipeline tests

use stackpilot::errors::OrchestratorError;
use stackpilot::events::{self, Emitter, Event, Severity};
use stackpilot::pipeline::{Pipeline, StepDefinition};

#[derive(Default)]
struct Trace {
    ran: Vec<&'static str>,
}

fn recording_step(name: &'static str) -> StepDefinition<Trace> {
    StepDefinition::new(name, format!("Step {}", name), move |t: &mut Trace, _em| {
        Box::pin(async move {
            t.ran.push(name);
            Ok(())
        })
    })
}

fn failing_step(name: &'static str) -> StepDefinition<Trace> {
    StepDefinition::new(name, format!("Step {}", name), move |t: &mut Trace, _em| {
        Box::pin(async move {
            t.ran.push(name);
            Err(OrchestratorError::Provision("quota exceeded".to_string()))
        })
    })
}

#[tokio::test]
async fn test_stops_at_first_failure() {
    let pipeline = Pipeline::new("abc")
        .step(recording_step("A"))
        .step(failing_step("B"))
        .step(recording_step("C"));
    let mut trace = Trace::default();

    let run = pipeline.run(&mut trace, &Emitter::noop()).await;

    assert_eq!(trace.ran, vec!["A", "B"]);
    assert_eq!(run.results.len(), 2);
    assert!(run.results[0].succeeded);
    assert!(!run.results[1].succeeded);
    assert_eq!(run.failed_step().map(|r| r.name.as_str()), Some("B"));

    let error = run.into_result().unwrap_err();
    match &error {
        OrchestratorError::Step { step, .. } => assert_eq!(step, "B"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(error.to_string().contains("quota exceeded"));
}

#[tokio::test]
async fn test_progress_and_logs_in_order() {
    let pipeline = Pipeline::new("two")
        .step(recording_step("A"))
        .step(recording_step("B"));
    let (emitter, mut rx) = events::channel(events::DEFAULT_CAPACITY);
    let mut trace = Trace::default();

    let run = pipeline.run(&mut trace, &emitter).await;
    drop(emitter);
    assert!(run.succeeded());

    let mut fractions = Vec::new();
    let mut successes = 0;
    let mut terminal = 0;
    while let Some(event) = rx.recv().await {
        match event {
            Event::Progress(p) => {
                fractions.push(p.fraction_complete);
                if p.terminal {
                    terminal += 1;
                }
            }
            Event::Log(l) if l.level == Severity::Success => successes += 1,
            Event::Log(_) => {}
        }
    }
    assert_eq!(fractions, vec![0.0, 0.5, 0.5, 1.0]);
    assert_eq!(successes, 2);
    assert_eq!(terminal, 1);
}

#[tokio::test]
async fn test_failure_emits_error_and_terminal_progress() {
    let pipeline = Pipeline::new("one").step(failing_step("only"));
    let (emitter, mut rx) = events::channel(16);
    let mut trace = Trace::default();

    let run = pipeline.run(&mut trace, &emitter).await;
    drop(emitter);
    assert!(!run.succeeded());

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Log(l) if l.level == Severity::Error && l.message.contains("only")
    )));
    match events.last() {
        Some(Event::Progress(p)) => {
            assert!(p.terminal);
            assert!(p.message.contains("failed"));
        }
        other => panic!("unexpected last event: {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_pipeline_succeeds() {
    let pipeline: Pipeline<Trace> = Pipeline::new("empty");
    let run = pipeline.run(&mut Trace::default(), &Emitter::noop()).await;
    assert!(run.succeeded());
    assert!(run.results.is_empty());
}
