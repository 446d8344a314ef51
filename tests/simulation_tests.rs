use iedsim::simulation::{ScenarioChange, ScenarioPreset, SimulationError};
use iedsim::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn registry() -> Arc<VariableRegistry> {
    let store = Arc::new(RegisterStore::new(100, Arc::new(ActivityLog::new())));
    Arc::new(VariableRegistry::new(store))
}

fn sine(amplitude: f64, offset: f64, period_s: f64) -> GeneratorKind {
    GeneratorKind::Sine {
        amplitude,
        offset,
        period_s,
        phase: 0.0,
    }
}

#[test]
fn test_sine_through_engine_ticks() {
    let registry = registry();
    registry
        .define(Variable::new("LOAD", RegisterBank::HoldingRegister, 0, 0.1, "MW"))
        .unwrap();
    let engine = SimulationEngine::new(Arc::clone(&registry), Duration::from_secs(15));
    engine
        .add_generator(Generator::new("load_wave", "LOAD", sine(10.0, 50.0, 60.0)))
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        let report = engine.tick();
        assert_eq!(report.written, 1);
        seen.push(registry.read_engineering("LOAD").unwrap());
    }
    assert_eq!(seen, vec![50.0, 60.0, 50.0, 40.0]);
    assert_eq!(registry.store().read_one(RegisterBank::HoldingRegister, 0).unwrap(), 400);
}

#[test]
fn test_generators_drive_read_only_banks() {
    let registry = registry();
    registry
        .define(Variable::new("FREQ", RegisterBank::InputRegister, 70, 0.01, "Hz"))
        .unwrap();
    let engine = SimulationEngine::new(Arc::clone(&registry), Duration::from_secs(1));
    engine
        .add_generator(Generator::new(
            "freq_ramp",
            "FREQ",
            GeneratorKind::Ramp {
                min: 59.9,
                max: 60.1,
                step: 0.1,
            },
        ))
        .unwrap();

    let values: Vec<f64> = (0..4)
        .map(|_| {
            engine.tick();
            registry.read_engineering("FREQ").unwrap()
        })
        .collect();
    assert_eq!(values, vec![59.9, 60.0, 60.1, 59.9]);

    let entries = registry.store().activity().recent(10);
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| e.source == WriteSource::Simulation));
}

#[test]
fn test_failing_generator_does_not_stop_others() {
    let registry = registry();
    registry
        .define(Variable::new("A", RegisterBank::HoldingRegister, 1, 1.0, ""))
        .unwrap();
    registry
        .define(Variable::new("B", RegisterBank::HoldingRegister, 2, 1.0, ""))
        .unwrap();
    let engine = SimulationEngine::new(Arc::clone(&registry), Duration::from_secs(1));
    engine
        .add_generator(Generator::new("a_wave", "A", sine(5.0, 10.0, 4.0)))
        .unwrap();
    // 70000 does not fit a 16-bit register.
    engine
        .add_generator(Generator::new("b_flat", "B", sine(0.0, 70000.0, 4.0)))
        .unwrap();

    let report = engine.tick();
    assert_eq!(report.written, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].generator, "b_flat");
    assert_eq!(registry.read_raw("A").unwrap(), 10);

    let stats = engine.stats();
    assert_eq!(stats.ticks, 1);
    assert_eq!(stats.failed_writes, 1);
}

#[test]
fn test_generator_bookkeeping() {
    let registry = registry();
    registry
        .define(Variable::new("A", RegisterBank::HoldingRegister, 1, 1.0, ""))
        .unwrap();
    let engine = SimulationEngine::new(Arc::clone(&registry), Duration::from_secs(1));

    assert!(matches!(
        engine.add_generator(Generator::new("g", "MISSING", sine(1.0, 1.0, 1.0))),
        Err(SimulationError::UnknownVariable(_))
    ));
    assert!(matches!(
        engine.add_generator(Generator::new("g", "A", sine(1.0, 1.0, 0.0))),
        Err(SimulationError::InvalidParameters(_))
    ));

    engine
        .add_generator(Generator::new("g", "A", sine(1.0, 1.0, 1.0)).disabled())
        .unwrap();
    assert!(matches!(
        engine.add_generator(Generator::new("g", "A", sine(1.0, 1.0, 1.0))),
        Err(SimulationError::DuplicateGenerator(_))
    ));

    // Disabled generators leave the register alone.
    assert_eq!(engine.tick().written, 0);
    engine.set_enabled("g", true).unwrap();
    assert_eq!(engine.tick().written, 1);

    engine
        .update_parameters(
            "g",
            GeneratorKind::Square {
                high: 9.0,
                low: 3.0,
                period_s: 10.0,
                duty_cycle: 0.5,
            },
        )
        .unwrap();
    engine.tick();
    assert_eq!(registry.read_raw("A").unwrap(), 9);

    let removed = engine.remove_generator("g").unwrap();
    assert_eq!(removed.name, "g");
    assert!(engine.list().is_empty());
    assert!(matches!(
        engine.set_enabled("g", true),
        Err(SimulationError::UnknownGenerator(_))
    ));
}

#[test]
fn test_oversized_ramp_rejected_and_engine_keeps_ticking() {
    let registry = registry();
    registry
        .define(Variable::new("V", RegisterBank::HoldingRegister, 0, 1.0, ""))
        .unwrap();
    let engine = SimulationEngine::new(Arc::clone(&registry), Duration::from_secs(1));

    let huge = GeneratorKind::Ramp {
        min: 0.0,
        max: 1e30,
        step: 1.0,
    };
    assert!(matches!(
        engine.add_generator(Generator::new("huge", "V", huge.clone())),
        Err(SimulationError::InvalidParameters(_))
    ));

    engine
        .add_generator(Generator::new(
            "tenths",
            "V",
            GeneratorKind::Ramp {
                min: 0.0,
                max: 3.0,
                step: 1.0,
            },
        ))
        .unwrap();
    assert!(engine.update_parameters("tenths", huge).is_err());
    assert_eq!(engine.tick().written, 1);
}

#[test]
fn test_ramp_includes_max_before_wrapping() {
    let registry = registry();
    registry
        .define(Variable::new("TAP", RegisterBank::HoldingRegister, 3, 0.1, ""))
        .unwrap();
    let engine = SimulationEngine::new(Arc::clone(&registry), Duration::from_secs(1));
    engine
        .add_generator(Generator::new(
            "tap_ramp",
            "TAP",
            GeneratorKind::Ramp {
                min: 0.0,
                max: 0.3,
                step: 0.1,
            },
        ))
        .unwrap();

    let values: Vec<f64> = (0..5)
        .map(|_| {
            engine.tick();
            registry.read_engineering("TAP").unwrap()
        })
        .collect();
    assert_eq!(values, vec![0.0, 0.1, 0.2, 0.3, 0.0]);
}

#[test]
fn test_scenario_is_all_or_nothing() {
    let registry = registry();
    registry
        .define(Variable::new("A", RegisterBank::HoldingRegister, 1, 1.0, ""))
        .unwrap();
    let engine = SimulationEngine::new(Arc::clone(&registry), Duration::from_secs(1));
    engine
        .add_generator(Generator::new("g", "A", sine(1.0, 5.0, 10.0)))
        .unwrap();

    let bad = ScenarioPreset {
        name: "storm".to_string(),
        changes: vec![
            ScenarioChange {
                generator: "g".to_string(),
                enabled: Some(false),
                kind: None,
            },
            ScenarioChange {
                generator: "nope".to_string(),
                enabled: Some(true),
                kind: None,
            },
        ],
    };
    assert!(engine.apply_scenario(&bad).is_err());
    assert!(engine.list()[0].enabled);

    let good = ScenarioPreset {
        name: "calm".to_string(),
        changes: vec![ScenarioChange {
            generator: "g".to_string(),
            enabled: Some(false),
            kind: Some(sine(0.0, 7.0, 10.0)),
        }],
    };
    assert_eq!(engine.apply_scenario(&good).unwrap(), 1);
    let generator = &engine.list()[0];
    assert!(!generator.enabled);
    assert_eq!(generator.kind, sine(0.0, 7.0, 10.0));
}

#[test]
fn test_random_walk_repeats_with_same_seed() {
    let walk = GeneratorKind::RandomWalk {
        min: 59.95,
        max: 60.05,
        max_step: 0.01,
        seed: 60,
    };
    let run = || {
        let registry = registry();
        registry
            .define(Variable::new("FREQ", RegisterBank::InputRegister, 0, 0.01, "Hz"))
            .unwrap();
        let engine = SimulationEngine::new(Arc::clone(&registry), Duration::from_secs(1));
        engine
            .add_generator(Generator::new("drift", "FREQ", walk.clone()))
            .unwrap();
        (0..20)
            .map(|_| {
                engine.tick();
                registry.read_engineering("FREQ").unwrap()
            })
            .collect::<Vec<f64>>()
    };

    let first = run();
    assert_eq!(first, run());
    assert!(first.iter().all(|v| (59.95..=60.05).contains(v)));
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let registry = registry();
    registry
        .define(Variable::new("A", RegisterBank::HoldingRegister, 1, 1.0, ""))
        .unwrap();
    let engine = Arc::new(SimulationEngine::new(
        Arc::clone(&registry),
        Duration::from_millis(10),
    ));
    engine
        .add_generator(Generator::new(
            "ramp",
            "A",
            GeneratorKind::Ramp {
                min: 0.0,
                max: 100.0,
                step: 1.0,
            },
        ))
        .unwrap();

    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(Arc::clone(&engine).run(rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();

    let ticks = engine.current_tick();
    assert!(ticks >= 2, "only {ticks} ticks");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.current_tick(), ticks);
}
