use std::sync::{Arc, Mutex};

use formula_recalc::{
    CalculationMode, CellId, CellRef, ChangeEvent, ChangeKind, Engine, EngineConfig, Expr,
    Function, Range, RecalcError, SheetRange, Value,
};
use pretty_assertions::assert_eq;

fn at(a1: &str) -> CellId {
    CellId::from_a1(0, a1).unwrap()
}

fn abs(a1: &str) -> Expr {
    Expr::abs(CellRef::from_a1(a1).unwrap())
}

fn sum(a1: &str) -> Expr {
    Expr::call(Function::Sum, vec![Expr::abs_range(Range::from_a1(a1).unwrap())])
}

fn recorder() -> (Arc<Mutex<Vec<ChangeEvent>>>, impl FnMut(&ChangeEvent) + Send + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    (log, move |event: &ChangeEvent| sink.lock().unwrap().push(*event))
}

#[test]
fn shared_ranges_are_interned_once() {
    let mut engine = Engine::default();
    engine.set_formula(at("B1"), sum("A1:A10")).unwrap();
    engine.set_formula(at("B2"), sum("A1:A10")).unwrap();
    engine.set_formula(at("B3"), sum("A1:A5")).unwrap();

    assert_eq!(engine.area_count(), 2);
    assert_eq!(engine.subscription_count(), 3);
    assert_eq!(engine.listener_count(), 3);
}

#[test]
fn deleting_formulas_leaves_no_listeners_behind() {
    let mut engine = Engine::default();
    engine.set_value(at("A1"), 1.0).unwrap();
    for a1 in ["B1", "B2", "B3"] {
        engine
            .set_formula(at(a1), Expr::add(sum("A1:A3"), abs("C1")))
            .unwrap();
    }
    engine.set_formula(at("D1"), sum("B1:B3")).unwrap();
    assert_eq!(engine.value(at("D1")), Value::Number(3.0));

    for a1 in ["B1", "B2", "B3", "D1"] {
        engine.clear_cell(at(a1)).unwrap();
    }
    assert_eq!(engine.formula_count(), 0);
    assert_eq!(engine.listener_count(), 0);
    assert_eq!(engine.subscription_count(), 0);
    assert_eq!(engine.area_count(), 0);
    assert_eq!(engine.group_count(), 0);

    // The old readers of A1 are gone, so editing it dirties nothing.
    engine.set_value(at("A1"), 2.0).unwrap();
    assert!(!engine.has_dirty_cells());
}

#[test]
fn observers_see_edits_and_recalculated_values() {
    let mut engine = Engine::default();
    engine.set_value(at("A1"), 1.0).unwrap();
    engine
        .set_formula(at("A2"), Expr::mul(abs("A1"), Expr::number(2.0)))
        .unwrap();

    let (log, callback) = recorder();
    let range = SheetRange::new(0, Range::from_a1("A1:A3").unwrap());
    let id = engine.subscribe(range, callback).unwrap();

    engine.set_value(at("A1"), 5.0).unwrap();
    assert_eq!(engine.value(at("A2")), Value::Number(10.0));
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            ChangeEvent {
                range: SheetRange::cell(at("A1")),
                kind: ChangeKind::ValueChanged,
            },
            ChangeEvent {
                range: SheetRange::cell(at("A2")),
                kind: ChangeKind::ValueChanged,
            },
        ]
    );

    engine.unsubscribe(id).unwrap();
    log.lock().unwrap().clear();
    engine.set_value(at("A1"), 6.0).unwrap();
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(engine.unsubscribe(id), Err(RecalcError::UnknownObserver(id)));
    assert_eq!(engine.listener_count(), 1);
}

#[test]
fn observers_hear_about_stale_cells_in_manual_mode() {
    let mut config = EngineConfig::default();
    config.calc.calculation_mode = CalculationMode::Manual;
    let mut engine = Engine::new(config);
    engine.set_value(at("A1"), 1.0).unwrap();
    engine
        .set_formula(at("B1"), Expr::add(abs("A1"), Expr::number(1.0)))
        .unwrap();
    engine.calc_all(false, false).unwrap();

    let (log, callback) = recorder();
    engine.subscribe(SheetRange::cell(at("B1")), callback).unwrap();
    engine.set_value(at("A1"), 2.0).unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec![ChangeEvent {
            range: SheetRange::cell(at("B1")),
            kind: ChangeKind::Dirtied,
        }]
    );
}

#[test]
fn invalid_ranges_are_rejected() {
    let mut engine = Engine::default();
    let beyond = SheetRange::cell(CellId::new(0, 2_000_000, 0));
    assert!(matches!(
        engine.subscribe(beyond, |_| {}),
        Err(RecalcError::InvalidRange { .. })
    ));
    assert!(engine.mark_dirty(beyond, true).is_err());
    assert!(engine.ensure_results_for(beyond).is_err());
    assert_eq!(engine.listener_count(), 0);
}

#[test]
fn runaway_propagation_falls_back_to_marking_everything() {
    let mut config = EngineConfig::default();
    config.calc.calculation_mode = CalculationMode::Manual;
    config.dirty_mark_limit = 4;
    let mut engine = Engine::new(config);
    engine.set_value(at("A1"), 1.0).unwrap();
    let step = Arc::new(Expr::add(Expr::rel(-1, 0), Expr::number(1.0)));
    for row in 1..10 {
        engine.set_formula(CellId::new(0, row, 0), step.clone()).unwrap();
    }
    engine.set_formula(at("C1"), Expr::number(3.0)).unwrap();
    engine.calc_all(false, false).unwrap();
    assert!(!engine.is_dirty(at("C1")));

    engine.set_value(at("A1"), 2.0).unwrap();
    assert!(engine.is_dirty(at("A10")));
    assert!(engine.is_dirty(at("C1")));

    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(at("A10")), Value::Number(11.0));
}
