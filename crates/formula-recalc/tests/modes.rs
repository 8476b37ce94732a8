use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use formula_recalc::{
    CalculationMode, CellId, CellRef, Engine, EngineConfig, ErrorKind, Expr,
    ExternalValueProvider, Function, HardRecalcState, RecalcMode, Value,
};
use pretty_assertions::assert_eq;

fn at(a1: &str) -> CellId {
    CellId::from_a1(0, a1).unwrap()
}

fn abs(a1: &str) -> Expr {
    Expr::abs(CellRef::from_a1(a1).unwrap())
}

fn manual() -> Engine {
    let mut config = EngineConfig::default();
    config.calc.calculation_mode = CalculationMode::Manual;
    Engine::new(config)
}

#[test]
fn eternal_state_skips_listeners_until_switched_off() {
    let mut engine = Engine::default();
    engine.set_hard_recalc_state(HardRecalcState::Eternal).unwrap();
    engine.set_value(at("A1"), 1.0).unwrap();
    engine
        .set_formula(at("A2"), Expr::mul(abs("A1"), Expr::number(2.0)))
        .unwrap();
    assert_eq!(engine.listener_count(), 0);
    assert_eq!(engine.value(at("A2")), Value::Blank);

    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(at("A2")), Value::Number(2.0));

    engine.set_value(at("A1"), 4.0).unwrap();
    let report = engine.calc_all(false, false).unwrap();
    assert_eq!(report.cells_evaluated, 1);
    assert_eq!(engine.value(at("A2")), Value::Number(8.0));

    engine.set_hard_recalc_state(HardRecalcState::Off).unwrap();
    assert_eq!(engine.listener_count(), 1);
    engine.set_value(at("A1"), 3.0).unwrap();
    assert_eq!(engine.value(at("A2")), Value::Number(6.0));
}

#[test]
fn temporary_state_recalculates_unattached_formulas_every_pass() {
    let mut engine = Engine::default();
    engine.set_value(at("A1"), 1.0).unwrap();
    engine.set_hard_recalc_state(HardRecalcState::Temporary).unwrap();
    engine
        .set_formula(at("A2"), Expr::mul(abs("A1"), Expr::number(2.0)))
        .unwrap();
    assert_eq!(engine.listener_count(), 0);

    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(at("A2")), Value::Number(2.0));

    engine.set_value(at("A1"), 5.0).unwrap();
    assert!(!engine.is_dirty(at("A2")));
    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(at("A2")), Value::Number(10.0));

    engine.set_hard_recalc_state(HardRecalcState::Off).unwrap();
    assert_eq!(engine.listener_count(), 1);
    assert_eq!(engine.hard_recalc_state(), HardRecalcState::Off);
    engine.set_value(at("A1"), 6.0).unwrap();
    assert_eq!(engine.value(at("A2")), Value::Number(12.0));
}

#[test]
fn readers_of_unattached_formulas_follow_their_new_values() {
    let mut engine = Engine::default();
    engine.set_value(at("A1"), 1.0).unwrap();
    engine
        .set_formula(at("A3"), Expr::add(abs("A2"), Expr::number(1.0)))
        .unwrap();
    assert_eq!(engine.value(at("A3")), Value::Number(1.0));

    engine.set_hard_recalc_state(HardRecalcState::Temporary).unwrap();
    engine
        .set_formula(at("A2"), Expr::mul(abs("A1"), Expr::number(2.0)))
        .unwrap();
    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(at("A2")), Value::Number(2.0));
    assert_eq!(engine.value(at("A3")), Value::Number(3.0));

    engine.set_value(at("A1"), 5.0).unwrap();
    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(at("A2")), Value::Number(10.0));
    assert_eq!(engine.value(at("A3")), Value::Number(11.0));
    assert!(!engine.has_dirty_cells());
}

#[test]
fn volatile_formulas_recalculate_on_every_pass() {
    let mut engine = manual();
    engine
        .set_formula(at("A1"), Expr::call(Function::Rand, vec![]))
        .unwrap();
    engine.set_formula(at("B1"), abs("A1")).unwrap();
    engine.set_value(at("D1"), 1.0).unwrap();
    engine
        .set_formula(at("C1"), Expr::add(abs("D1"), Expr::number(1.0)))
        .unwrap();
    engine.calc_all(false, false).unwrap();
    let first = engine.value(at("A1"));
    let Value::Number(n) = first else {
        panic!("RAND should be numeric");
    };
    assert!((0.0..1.0).contains(&n));

    engine.set_value(at("D1"), 2.0).unwrap();
    let report = engine.calc_all(true, false).unwrap();
    assert_eq!(report.cells_evaluated, 2);
    assert_ne!(engine.value(at("A1")), first);
    assert_eq!(engine.value(at("B1")), engine.value(at("A1")));
    assert!(engine.is_dirty(at("C1")));

    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(at("C1")), Value::Number(3.0));
}

#[test]
fn seeded_engines_draw_the_same_numbers() {
    let draw = || {
        let mut engine = manual();
        engine
            .set_formula(at("A1"), Expr::call(Function::Rand, vec![]))
            .unwrap();
        engine.calc_all(false, false).unwrap();
        engine.value(at("A1"))
    };
    assert_eq!(draw(), draw());
}

#[derive(Default)]
struct Links(Mutex<HashMap<String, Value>>);

impl Links {
    fn set(&self, link: &str, value: f64) {
        self.0.lock().unwrap().insert(link.to_string(), Value::Number(value));
    }
}

impl ExternalValueProvider for Links {
    fn get(&self, link: &str) -> Option<Value> {
        self.0.lock().unwrap().get(link).cloned()
    }
}

#[test]
fn external_links_refresh_on_notification() {
    let mut engine = Engine::default();
    engine
        .set_formula(at("A1"), Expr::mul(Expr::external("price"), Expr::number(2.0)))
        .unwrap();
    engine.set_formula(at("A2"), Expr::external("missing")).unwrap();
    assert_eq!(engine.value(at("A1")), Value::Error(ErrorKind::Ref));

    let links = Arc::new(Links::default());
    links.set("price", 5.0);
    engine.set_external_value_provider(Some(links.clone() as Arc<dyn ExternalValueProvider>));
    assert_eq!(engine.value(at("A1")), Value::Error(ErrorKind::Ref));

    engine.external_link_changed("price").unwrap();
    assert_eq!(engine.value(at("A1")), Value::Number(10.0));

    links.set("price", 7.0);
    engine.external_link_changed("price").unwrap();
    assert_eq!(engine.value(at("A1")), Value::Number(14.0));
    assert_eq!(engine.value(at("A2")), Value::Error(ErrorKind::Ref));

    engine.clear_cell(at("A1")).unwrap();
    engine.external_link_changed("price").unwrap();
    assert!(!engine.has_dirty_cells());
}

#[test]
fn config_loads_from_partial_json() {
    let config = EngineConfig::from_json_str(
        r#"{
            "calc": {
                "calculationMode": "manual",
                "iterative": {"enabled": true, "maxIterations": 10}
            },
            "recalcMode": "single_threaded",
            "rngSeed": 42
        }"#,
    )
    .unwrap();
    assert_eq!(config.recalc_mode, RecalcMode::SingleThreaded);
    assert_eq!(config.calc.iterative.max_iterations, 10);
    assert_eq!(config.calc.iterative.max_change, 0.001);
    assert_eq!(config.rng_seed, 42);

    let mut engine = Engine::new(config);
    engine.set_value(at("A1"), 1.0).unwrap();
    engine.set_formula(at("A2"), abs("A1")).unwrap();
    assert!(engine.is_dirty(at("A2")));
    assert_eq!(engine.config().calc.calculation_mode, CalculationMode::Manual);
}

#[test]
fn recalc_mode_can_change_between_passes() {
    let mut engine = manual();
    engine.set_recalc_mode(RecalcMode::SingleThreaded);
    engine.set_value(CellId::from_a1(1, "A1").unwrap(), 4.0).unwrap();
    engine
        .set_formula(at("B1"), Expr::neg(Expr::abs_on(1, CellRef::from_a1("A1").unwrap())))
        .unwrap();
    engine
        .set_formula(at("C1"), Expr::div(abs("B1"), Expr::number(0.0)))
        .unwrap();
    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(at("B1")), Value::Number(-4.0));
    assert!(engine.value(at("C1")).is_error());

    engine.set_recalc_mode(RecalcMode::MultiThreaded);
    engine.set_value(CellId::from_a1(1, "A1").unwrap(), 2.5).unwrap();
    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(at("B1")), Value::Number(-2.5));
    assert_eq!(engine.value(at("C1")), Value::Error(ErrorKind::Div0));
}
