use formula_recalc::{
    CalculationMode, CellId, CellRef, Engine, EngineConfig, Expr, Function, Range, SheetRange,
    Value,
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
fn chain_follows_edits_and_deletion() {
    let mut engine = Engine::default();
    engine.set_value(at("A1"), 5.0).unwrap();
    engine
        .set_formula(at("A2"), Expr::mul(abs("A1"), Expr::number(2.0)))
        .unwrap();
    engine
        .set_formula(at("A3"), Expr::add(abs("A2"), Expr::number(1.0)))
        .unwrap();
    assert_eq!(engine.value(at("A2")), Value::Number(10.0));
    assert_eq!(engine.value(at("A3")), Value::Number(11.0));

    engine.set_value(at("A1"), 10.0).unwrap();
    assert_eq!(engine.value(at("A2")), Value::Number(20.0));
    assert_eq!(engine.value(at("A3")), Value::Number(21.0));

    engine.clear_cell(at("A1")).unwrap();
    assert_eq!(engine.value(at("A2")), Value::Number(0.0));
    assert_eq!(engine.value(at("A3")), Value::Number(1.0));
    assert!(!engine.has_dirty_cells());
}

#[test]
fn manual_mode_only_marks_dependents_dirty() {
    let mut engine = manual();
    engine.set_value(at("A1"), 1.0).unwrap();
    engine
        .set_formula(at("B1"), Expr::add(abs("A1"), Expr::number(1.0)))
        .unwrap();
    assert!(engine.is_dirty(at("B1")));
    assert_eq!(engine.value(at("B1")), Value::Blank);

    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(at("B1")), Value::Number(2.0));

    engine.set_value(at("A1"), 41.0).unwrap();
    assert!(engine.is_dirty(at("B1")));
    assert_eq!(engine.queue_len(), 1);
    assert_eq!(engine.value(at("B1")), Value::Number(2.0));

    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(at("B1")), Value::Number(42.0));
}

#[test]
fn recalculation_is_idempotent() {
    let mut engine = manual();
    engine.set_value(at("A1"), 3.0).unwrap();
    engine
        .set_formula(at("A2"), Expr::mul(abs("A1"), abs("A1")))
        .unwrap();
    engine
        .set_formula(
            at("A3"),
            Expr::call(
                Function::Sum,
                vec![Expr::abs_range(Range::from_a1("A1:A2").unwrap())],
            ),
        )
        .unwrap();

    let first = engine.calc_all(false, false).unwrap();
    assert_eq!(first.cells_evaluated, 2);
    let before: Vec<Value> = ["A1", "A2", "A3"].iter().map(|c| engine.value(at(c))).collect();

    let second = engine.calc_all(false, false).unwrap();
    assert_eq!(second.cells_evaluated, 0);
    let after: Vec<Value> = ["A1", "A2", "A3"].iter().map(|c| engine.value(at(c))).collect();
    assert_eq!(before, after);
    assert_eq!(after[2], Value::Number(12.0));
}

#[test]
fn unrelated_formulas_are_not_recalculated() {
    let mut engine = manual();
    engine.set_value(at("A1"), 1.0).unwrap();
    engine.set_value(at("D1"), 3.0).unwrap();
    engine
        .set_formula(at("B1"), Expr::add(abs("A1"), Expr::number(1.0)))
        .unwrap();
    engine
        .set_formula(at("C1"), Expr::mul(abs("D1"), Expr::number(2.0)))
        .unwrap();
    engine.calc_all(false, false).unwrap();

    engine.set_value(at("A1"), 2.0).unwrap();
    assert!(engine.is_dirty(at("B1")));
    assert!(!engine.is_dirty(at("C1")));

    let report = engine.calc_all(false, false).unwrap();
    assert_eq!(report.cells_evaluated, 1);
    assert_eq!(engine.value(at("C1")), Value::Number(6.0));
}

#[test]
fn full_recalculation_revisits_every_formula() {
    let mut engine = manual();
    engine.set_value(at("A1"), 1.0).unwrap();
    engine
        .set_formula(at("B1"), Expr::add(abs("A1"), Expr::number(1.0)))
        .unwrap();
    engine.set_formula(at("C1"), Expr::number(7.0)).unwrap();
    engine.calc_all(false, false).unwrap();

    let report = engine.calc_all(false, true).unwrap();
    assert_eq!(report.cells_evaluated, 2);
    assert_eq!(engine.last_report(), Some(&report));
}

#[test]
fn ensure_results_for_evaluates_only_what_the_range_needs() {
    let mut engine = manual();
    engine.set_value(at("A1"), 1.0).unwrap();
    engine
        .set_formula(at("A2"), Expr::add(abs("A1"), Expr::number(1.0)))
        .unwrap();
    engine
        .set_formula(at("A3"), Expr::add(abs("A2"), Expr::number(1.0)))
        .unwrap();
    engine
        .set_formula(at("B1"), Expr::mul(abs("A1"), Expr::number(10.0)))
        .unwrap();

    engine.ensure_results_for(SheetRange::cell(at("A3"))).unwrap();
    assert_eq!(engine.value(at("A3")), Value::Number(3.0));
    assert_eq!(engine.value(at("A2")), Value::Number(2.0));
    assert!(engine.is_dirty(at("B1")));
    assert_eq!(engine.value(at("B1")), Value::Blank);
}

#[test]
fn long_chains_do_not_recurse_on_the_native_stack() {
    const LEN: u32 = 20_000;
    let mut engine = manual();
    engine.set_value(CellId::new(0, 0, 0), 0.0).unwrap();
    let step = std::sync::Arc::new(Expr::add(Expr::rel(-1, 0), Expr::number(1.0)));
    for row in 1..LEN {
        engine.set_formula(CellId::new(0, row, 0), step.clone()).unwrap();
    }

    let last = CellId::new(0, LEN - 1, 0);
    engine.ensure_results_for(SheetRange::cell(last)).unwrap();
    assert_eq!(engine.value(last), Value::Number(f64::from(LEN - 1)));

    engine.set_value(CellId::new(0, 0, 0), 1.0).unwrap();
    engine.calc_all(false, false).unwrap();
    assert_eq!(engine.value(last), Value::Number(f64::from(LEN)));
}

#[test]
fn mark_dirty_with_empty_cells_reaches_readers_of_blank_ranges() {
    let mut engine = manual();
    engine
        .set_formula(
            at("B1"),
            Expr::call(
                Function::Count,
                vec![Expr::abs_range(Range::from_a1("A1:A10").unwrap())],
            ),
        )
        .unwrap();
    engine.calc_all(false, false).unwrap();
    assert!(!engine.is_dirty(at("B1")));

    let range = SheetRange::new(0, Range::from_a1("A5:A6").unwrap());
    engine.mark_dirty(range, false).unwrap();
    assert!(!engine.is_dirty(at("B1")));

    engine.mark_dirty(range, true).unwrap();
    assert!(engine.is_dirty(at("B1")));
}

#[test]
fn switching_to_automatic_recalculates_pending_work() {
    let mut engine = manual();
    engine.set_value(at("A1"), 2.0).unwrap();
    engine
        .set_formula(at("A2"), Expr::mul(abs("A1"), Expr::number(3.0)))
        .unwrap();
    assert!(engine.has_dirty_cells());

    let mut settings = engine.config().calc.clone();
    settings.calculation_mode = CalculationMode::Automatic;
    engine.set_calc_settings(settings).unwrap();
    assert!(!engine.has_dirty_cells());
    assert_eq!(engine.value(at("A2")), Value::Number(6.0));
}

#[test]
fn precedent_ranges_reflect_the_formula() {
    let mut engine = manual();
    engine
        .set_formula(
            at("C3"),
            Expr::add(
                Expr::rel(-2, -2),
                Expr::call(
                    Function::Sum,
                    vec![Expr::abs_range(Range::from_a1("B1:B4").unwrap())],
                ),
            ),
        )
        .unwrap();

    assert_eq!(
        engine.precedent_ranges(at("C3")),
        vec![
            SheetRange::cell(at("A1")),
            SheetRange::new(0, Range::from_a1("B1:B4").unwrap()),
        ]
    );
    assert!(engine.precedent_ranges(at("Z9")).is_empty());
}
