//! Interaction pipeline integration tests
//!
//! Drives the state machine end to end over scripted capabilities and a
//! manual clock; no audio hardware or network is touched.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use jasper::config::file::write_config;
use jasper::inference::{CONNECT_FALLBACK, InferenceReply};
use jasper::pipeline::{PROBE_INTERVAL, RELOAD_INTERVAL};
use jasper::{ConversationHistory, PipelineState, Role, RuntimeConfig};

mod common;

use common::{Harness, Step, command, enabled_config, fail, quiet, speech, wake};

#[tokio::test]
async fn test_wake_command_is_answered_and_recorded() {
    let harness = Harness::new(&enabled_config());
    harness.queue_transcript("jasper what time is it");

    let mut script = vec![quiet(3)];
    script.extend(command());
    let mut pipeline = harness.pipeline(script);
    pipeline.run().await;

    assert_eq!(
        harness.prompts.borrow().as_slice(),
        ["user: jasper what time is it\nassistant:".to_string()]
    );
    assert_eq!(
        harness.spoken.borrow().as_slice(),
        [("It is noon.".to_string(), 75)]
    );

    let turns: Vec<_> = pipeline.history().turns().collect();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].content, "jasper what time is it");
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].content, "It is noon.");

    let persisted = ConversationHistory::load(harness.history_path());
    assert_eq!(persisted.len(), 2);

    assert_eq!(pipeline.state(), PipelineState::Listening);
    let stats = pipeline.stats();
    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.queries, 1);
}

#[tokio::test]
async fn test_leading_silence_is_not_transcribed() {
    let harness = Harness::new(&enabled_config());
    harness.queue_transcript("jasper hello");

    let script = vec![wake(), quiet(4), speech(5), quiet(31)];
    let mut pipeline = harness.pipeline(script);
    pipeline.run().await;

    // 5 speech frames + 31 trailing silence frames of 480 samples
    assert_eq!(harness.utterances.borrow().as_slice(), [36 * 480]);
}

#[tokio::test]
async fn test_second_query_carries_previous_exchange() {
    let harness = Harness::new(&enabled_config());
    harness.queue_transcript("jasper hello");
    harness.queue_transcript("jasper what time is it");

    let mut script = command();
    script.extend(command());
    let mut pipeline = harness.pipeline(script);
    pipeline.run().await;

    let prompts = harness.prompts.borrow();
    assert_eq!(prompts.len(), 2);
    assert_eq!(
        prompts[1],
        "user: jasper hello\nassistant: It is noon.\nuser: jasper what time is it\nassistant:"
    );
    assert_eq!(pipeline.history().len(), 4);
}

#[tokio::test]
async fn test_history_disabled_sends_bare_prompt() {
    let harness = Harness::new(&{
        let mut config = enabled_config();
        config.history_enabled = false;
        config
    });
    harness.queue_transcript("jasper hello");
    harness.queue_transcript("jasper again");

    let mut script = command();
    script.extend(command());
    let mut pipeline = harness.pipeline(script);
    pipeline.run().await;

    assert_eq!(
        harness.prompts.borrow()[1],
        "user: jasper again\nassistant:"
    );
    assert!(pipeline.history().is_empty());
    assert_eq!(harness.spoken.borrow().len(), 2);
}

#[tokio::test]
async fn test_unreachable_inference_speaks_and_records_apology() {
    let harness = Harness::new(&enabled_config());
    harness.queue_transcript("jasper what time is it");
    harness.set_reply(InferenceReply::fallback(CONNECT_FALLBACK));

    let mut pipeline = harness.pipeline(command());
    pipeline.run().await;

    assert_eq!(harness.spoken_texts(), [CONNECT_FALLBACK.to_string()]);

    let turns: Vec<_> = pipeline.history().turns().collect();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].content, CONNECT_FALLBACK);
    assert_eq!(pipeline.stats().fallbacks, 1);
}

#[tokio::test]
async fn test_fallback_replies_can_be_kept_out_of_history() {
    let harness = Harness::new(&{
        let mut config = enabled_config();
        config.record_fallback_replies = false;
        config
    });
    harness.queue_transcript("jasper what time is it");
    harness.set_reply(InferenceReply::fallback(CONNECT_FALLBACK));

    let mut pipeline = harness.pipeline(command());
    pipeline.run().await;

    assert_eq!(harness.spoken_texts(), [CONNECT_FALLBACK.to_string()]);
    assert!(pipeline.history().is_empty());
}

#[tokio::test]
async fn test_silence_after_wake_skips_transcription() {
    let harness = Harness::new(&enabled_config());

    // 10 s of recording at 30 ms per frame, plus some listening afterwards
    let mut pipeline = harness.pipeline(vec![wake(), quiet(400)]);
    pipeline.run().await;

    assert!(harness.utterances.borrow().is_empty());
    assert!(harness.prompts.borrow().is_empty());
    assert!(harness.spoken.borrow().is_empty());
    assert_eq!(pipeline.stats().empty_recordings, 1);
    assert_eq!(pipeline.state(), PipelineState::Listening);
}

#[tokio::test]
async fn test_transcript_without_wake_phrase_is_ignored() {
    let harness = Harness::new(&enabled_config());
    harness.queue_transcript("what time is it");

    let mut pipeline = harness.pipeline(command());
    pipeline.run().await;

    assert_eq!(harness.utterances.borrow().len(), 1);
    assert!(harness.prompts.borrow().is_empty());
    assert!(harness.spoken.borrow().is_empty());
    assert!(pipeline.history().is_empty());
    assert_eq!(pipeline.stats().rejected, 1);
}

#[tokio::test]
async fn test_empty_transcript_ends_cycle() {
    let harness = Harness::new(&enabled_config());

    let mut pipeline = harness.pipeline(command());
    pipeline.run().await;

    assert_eq!(harness.utterances.borrow().len(), 1);
    assert!(harness.prompts.borrow().is_empty());
    assert_eq!(pipeline.state(), PipelineState::Listening);
}

#[tokio::test]
async fn test_empty_reply_is_recorded_but_not_spoken() {
    let harness = Harness::new(&enabled_config());
    harness.queue_transcript("jasper say nothing");
    harness.set_reply(InferenceReply::answer(""));

    let mut pipeline = harness.pipeline(command());
    pipeline.run().await;

    assert!(harness.spoken.borrow().is_empty());
    assert_eq!(pipeline.history().len(), 2);
}

#[tokio::test]
async fn test_history_stays_bounded_across_cycles() {
    let harness = Harness::new(&{
        let mut config = enabled_config();
        config.max_turns = 2;
        config
    });

    let mut script = Vec::new();
    for i in 0..5 {
        harness.queue_transcript(&format!("jasper q{i}"));
        script.extend(command());
    }
    let mut pipeline = harness.pipeline(script);
    pipeline.run().await;

    assert_eq!(pipeline.stats().cycles, 5);

    let contents: Vec<_> = pipeline
        .history()
        .turns()
        .map(|turn| turn.content.clone())
        .collect();
    assert_eq!(
        contents,
        ["jasper q3", "It is noon.", "jasper q4", "It is noon."]
    );
    assert_eq!(ConversationHistory::load(harness.history_path()).len(), 4);
}

#[tokio::test]
async fn test_oversized_history_is_trimmed_at_startup() {
    let harness = Harness::new(&{
        let mut config = enabled_config();
        config.max_turns = 10;
        config
    });
    let mut history = ConversationHistory::load(harness.history_path());
    for i in 0..10 {
        history
            .record_exchange(&format!("q{i}"), &format!("a{i}"), 10)
            .unwrap();
    }

    harness.write_config(&{
        let mut config = enabled_config();
        config.max_turns = 2;
        config
    });
    let pipeline = harness.pipeline(Vec::new());

    let contents: Vec<_> = pipeline
        .history()
        .turns()
        .map(|turn| turn.content.clone())
        .collect();
    assert_eq!(contents, ["q8", "a8", "q9", "a9"]);
    assert_eq!(ConversationHistory::load(harness.history_path()).len(), 4);
}

#[tokio::test]
async fn test_lowered_max_turns_trims_history_on_reload() {
    let harness = Harness::new(&enabled_config());
    let mut history = ConversationHistory::load(harness.history_path());
    for i in 0..5 {
        history
            .record_exchange(&format!("q{i}"), &format!("a{i}"), 10)
            .unwrap();
    }

    let lowered = {
        let mut config = enabled_config();
        config.max_turns = 1;
        config
    };
    let mut pipeline = harness.pipeline(vec![harness.config_change(lowered), quiet(70)]);
    assert_eq!(pipeline.history().len(), 10);

    pipeline.run().await;

    assert_eq!(pipeline.stats().cycles, 0);
    assert_eq!(pipeline.history().len(), 2);
    assert_eq!(ConversationHistory::load(harness.history_path()).len(), 2);
}

#[tokio::test]
async fn test_blank_wake_phrase_still_requires_default_phrase() {
    let harness = Harness::new(&{
        let mut config = enabled_config();
        config.wake_phrase = "   ".to_string();
        config
    });
    harness.queue_transcript("what time is it");
    harness.queue_transcript("jasper what time is it");

    let mut script = command();
    script.extend(command());
    let mut pipeline = harness.pipeline(script);
    pipeline.run().await;

    assert_eq!(pipeline.config().wake_phrase, "jasper");
    assert_eq!(pipeline.stats().rejected, 1);
    assert_eq!(
        harness.prompts.borrow().as_slice(),
        ["user: jasper what time is it\nassistant:".to_string()]
    );
}

#[tokio::test]
async fn test_shutdown_during_recording_finishes_cycle() {
    let harness = Harness::new(&enabled_config());
    harness.queue_transcript("jasper what time is it");

    let request_shutdown = {
        let shutdown = harness.shutdown.clone();
        Step::Call(Box::new(move || shutdown.trigger()))
    };
    let script = vec![
        wake(),
        speech(3),
        request_shutdown,
        speech(2),
        quiet(31),
        quiet(200),
    ];
    let mut pipeline = harness.pipeline(script);
    pipeline.run().await;

    assert_eq!(
        harness.spoken.borrow().as_slice(),
        [("It is noon.".to_string(), 75)]
    );
    assert_eq!(pipeline.stats().cycles, 1);
    assert_eq!(ConversationHistory::load(harness.history_path()).len(), 2);
    assert_eq!(harness.utterances.borrow().as_slice(), [36 * 480]);
    assert_eq!(pipeline.state(), PipelineState::Listening);
    assert!(harness.suspends.get() >= 1);
}

#[tokio::test]
async fn test_disable_takes_effect_within_one_reload_interval() {
    let harness = Harness::new(&enabled_config());

    let written_at = Rc::new(Cell::new(None));
    let write_disabled = {
        let path = harness.config_path();
        let clock = harness.clock.clone();
        let written_at = Rc::clone(&written_at);
        Step::Call(Box::new(move || {
            write_config(&path, &RuntimeConfig::default()).unwrap();
            written_at.set(Some(clock.elapsed()));
        }))
    };

    let mut pipeline = harness.pipeline(vec![quiet(10), write_disabled, quiet(200)]);

    pipeline.step().await;
    assert_eq!(pipeline.state(), PipelineState::Listening);

    pipeline.step().await;
    assert_eq!(pipeline.state(), PipelineState::Disabled);

    let written_at = written_at.get().unwrap();
    assert!(harness.clock.elapsed() - written_at <= RELOAD_INTERVAL);
    assert!(!pipeline.config().enabled);
    assert!(harness.suspends.get() >= 1);
}

#[tokio::test]
async fn test_disable_mid_cycle_finishes_cycle_first() {
    let harness = Harness::new(&enabled_config());
    harness.queue_transcript("jasper what time is it");

    let script = vec![
        wake(),
        speech(3),
        harness.config_change(RuntimeConfig::default()),
        speech(2),
        quiet(31),
        quiet(200),
    ];
    let mut pipeline = harness.pipeline(script);

    pipeline.step().await;
    pipeline.step().await;
    assert_eq!(pipeline.state(), PipelineState::Listening);
    assert_eq!(harness.spoken.borrow().len(), 1);
    assert_eq!(pipeline.history().len(), 2);

    pipeline.step().await;
    assert_eq!(pipeline.state(), PipelineState::Disabled);
}

#[tokio::test]
async fn test_enable_from_disabled_resumes_listening() {
    let harness = Harness::new(&RuntimeConfig::default());
    let mut pipeline = harness.pipeline(vec![quiet(10)]);

    pipeline.step().await;
    assert_eq!(pipeline.state(), PipelineState::Disabled);

    harness.write_config(&enabled_config());

    for _ in 0..100 {
        if pipeline.state() != PipelineState::Disabled {
            break;
        }
        pipeline.step().await;
    }

    assert_eq!(pipeline.state(), PipelineState::Listening);
    assert!(harness.clock.elapsed() <= RELOAD_INTERVAL);
}

#[tokio::test]
async fn test_enable_without_device_waits_for_hardware() {
    let harness = Harness::new(&RuntimeConfig::default());
    harness.device_available.set(false);
    let mut pipeline = harness.pipeline(vec![quiet(10)]);

    pipeline.step().await;
    harness.write_config(&enabled_config());

    for _ in 0..20 {
        pipeline.step().await;
    }

    assert_eq!(pipeline.state(), PipelineState::DeviceUnavailable);
}

#[tokio::test]
async fn test_missing_device_is_reprobed_every_30_seconds() {
    let harness = Harness::new(&enabled_config());
    harness.device_available.set(false);
    let mut pipeline = harness.pipeline(vec![quiet(10)]);

    pipeline.step().await;
    assert_eq!(pipeline.state(), PipelineState::DeviceUnavailable);
    assert_eq!(harness.probes.get(), 1);

    while harness.clock.elapsed() < Duration::from_secs(65) {
        pipeline.step().await;
    }
    assert_eq!(pipeline.state(), PipelineState::DeviceUnavailable);
    assert_eq!(harness.probes.get(), 3);

    harness.device_available.set(true);
    let resumed_after = harness.clock.elapsed();
    for _ in 0..200 {
        if pipeline.state() == PipelineState::Listening {
            break;
        }
        pipeline.step().await;
    }

    assert_eq!(pipeline.state(), PipelineState::Listening);
    assert!(harness.clock.elapsed() - resumed_after <= PROBE_INTERVAL);
}

#[tokio::test]
async fn test_device_recovery_happens_at_probe_interval() {
    let harness = Harness::new(&enabled_config());
    harness.device_available.set(false);
    let mut pipeline = harness.pipeline(vec![quiet(10)]);

    pipeline.step().await;
    harness.device_available.set(true);

    for _ in 0..200 {
        if pipeline.state() == PipelineState::Listening {
            break;
        }
        pipeline.step().await;
    }

    assert_eq!(pipeline.state(), PipelineState::Listening);
    assert_eq!(harness.clock.elapsed(), PROBE_INTERVAL);
}

#[tokio::test]
async fn test_repeated_read_failures_reprobe_device() {
    let harness = Harness::new(&enabled_config());
    let mut pipeline = harness.pipeline(vec![fail(10), quiet(10)]);

    pipeline.step().await;
    assert_eq!(pipeline.state(), PipelineState::Listening);
    let probes_before = harness.probes.get();

    harness.device_available.set(false);
    pipeline.step().await;

    assert_eq!(pipeline.state(), PipelineState::DeviceUnavailable);
    assert_eq!(harness.probes.get(), probes_before + 1);
}

#[tokio::test]
async fn test_read_failures_with_device_present_keep_listening() {
    let harness = Harness::new(&enabled_config());
    harness.queue_transcript("jasper are you there");

    let mut script = vec![fail(12)];
    script.extend(command());
    let mut pipeline = harness.pipeline(script);
    pipeline.run().await;

    assert_eq!(harness.spoken.borrow().len(), 1);
    assert_eq!(pipeline.state(), PipelineState::Listening);
}

#[tokio::test]
async fn test_reload_propagates_to_components() {
    let harness = Harness::new(&enabled_config());
    harness.queue_transcript("jasper hello");

    let mut changed = {
        let mut config = enabled_config();
        config.inference_port = 9000;
        config.vad_aggressiveness = 1;
        config
    };
    changed.set_volume(30);

    let mut script = vec![harness.config_change(changed), quiet(70)];
    script.extend(command());
    let mut pipeline = harness.pipeline(script);
    pipeline.run().await;

    assert_eq!(
        harness.spoken.borrow().as_slice(),
        [("It is noon.".to_string(), 30)]
    );
    assert_eq!(harness.vad_aggressiveness.get(), 1);
    assert_eq!(
        harness.endpoints.borrow().last().map(String::as_str),
        Some("http://localhost:9000")
    );
    assert_eq!(pipeline.stats().config_changes, 1);
}

#[tokio::test]
async fn test_raised_threshold_suppresses_wake() {
    let harness = Harness::new(&enabled_config());

    let raised = {
        let mut config = enabled_config();
        config.wake_threshold = 0.95;
        config
    };
    let mut script = vec![harness.config_change(raised), quiet(70)];
    script.extend(command());
    let mut pipeline = harness.pipeline(script);
    pipeline.run().await;

    assert_eq!(pipeline.stats().cycles, 0);
}

#[tokio::test]
async fn test_corrupt_config_keeps_running() {
    let harness = Harness::new(&enabled_config());
    harness.queue_transcript("jasper still here");

    let path = harness.config_path();
    let corrupt = Step::Call(Box::new(move || {
        std::fs::write(&path, "{ not json").unwrap();
    }));

    let mut script = vec![corrupt, quiet(70)];
    script.extend(command());
    let mut pipeline = harness.pipeline(script);
    pipeline.run().await;

    assert!(pipeline.config().enabled);
    assert_eq!(harness.spoken.borrow().len(), 1);
}
