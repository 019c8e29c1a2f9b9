//! Compiler surface: grammar coverage, legacy equivalence, round-trips.

use rmt_compose::prelude::*;

use rstest::rstest;

fn opcodes(source: &str) -> Vec<Opcode> {
    compile_source(source)
        .unwrap()
        .instructions()
        .map(|instruction| instruction.unwrap().opcode())
        .collect()
}

#[rstest]
#[case("base.f * (3/2)")]
#[case("[1].t + [1].d")]
#[case("2^(1/12) * [3].f")]
#[case("-(base.t + 1) * 0.5")]
#[case("beat([5]) * tempo(base)")]
#[case("measure([9]) - beat(base)")]
#[case("60 / tempo([2])")]
#[case("[65535].ml ^ 2")]
#[case("3 - - 2")]
#[case("module.getNoteById(4).getVariable('duration').pow(new Fraction(2))")]
#[case("module.findMeasureLength(module.getNoteById(3)).mul(new Fraction(1, 2))")]
fn decompile_round_trips_to_identical_bytecode(#[case] source: &str) {
    let compiled = compile_source(source).unwrap();
    let rendered = decompile(compiled.bytecode()).unwrap();
    let recompiled = compile_source(&rendered).unwrap();
    assert_eq!(
        recompiled.bytecode(),
        compiled.bytecode(),
        "via `{rendered}`"
    );
}

#[rstest]
#[case(
    "module.baseNote.getVariable('frequency').mul(new Fraction(3, 2))",
    "base.f * (3/2)"
)]
#[case(
    "module.getNoteById(1).getVariable('startTime').add(module.getNoteById(1).getVariable('duration'))",
    "[1].t + [1].d"
)]
#[case(
    "module.baseNote.getVariable('frequency').mul(new Fraction(2).pow(new Fraction(1, 12)))",
    "base.f * 2^(1/12)"
)]
#[case("new Fraction(60).div(module.findTempo(module.getNoteById(7)))", "beat([7])")]
#[case("module.baseNote.getVariable('tempo')", "tempo(base)")]
#[case("module.getNoteById(3).getVariable('measureLength')", "measure([3])")]
#[case("new Fraction(3).neg()", "-3")]
fn legacy_form_matches_the_dsl(#[case] legacy: &str, #[case] modern: &str) {
    let legacy = compile_source(legacy).unwrap();
    let modern = compile_source(modern).unwrap();
    assert_eq!(legacy.bytecode(), modern.bytecode());
    assert_eq!(legacy.references(), modern.references());
    assert_eq!(legacy.references_base(), modern.references_base());
}

#[test]
fn reference_metadata_is_complete() {
    let expr = compile_source("[2].f + beat([9]) + base.d + tempo([2])").unwrap();
    assert_eq!(
        expr.references().iter().copied().collect::<Vec<_>>(),
        vec![2, 9]
    );
    assert!(expr.references_base());
}

#[test]
fn the_same_source_always_yields_the_same_bytecode() {
    let first = compile_source("base.f * 2^(7/12) + 0.25").unwrap();
    let second = compile_source("base.f * 2^(7/12) + 0.25").unwrap();
    assert_eq!(first, second);
}

#[test]
fn empty_sources_are_rejected_eagerly() {
    let mut compiler = Compiler::new();
    assert_eq!(compiler.compile(""), Err(ExpressionError::EmptySource));
    assert_eq!(compiler.compile("   "), Err(ExpressionError::EmptySource));
}

#[rstest]
#[case("base.")]
#[case("[1]")]
#[case("(1 + 2")]
#[case("1 +")]
#[case("beat(7)")]
#[case("module.frobnicate(3)")]
#[case("new Fraction()")]
fn malformed_sources_report_parse_errors(#[case] source: &str) {
    assert!(matches!(
        compile_source(source),
        Err(ExpressionError::Parse { .. })
    ));
}

#[test]
fn unknown_variables_are_their_own_error() {
    assert_eq!(
        compile_source("base.volume"),
        Err(ExpressionError::UnknownVariable("volume".into()))
    );
    assert_eq!(
        compile_source("module.baseNote.getVariable('volume')"),
        Err(ExpressionError::UnknownVariable("volume".into()))
    );
}

#[test]
fn property_shorthands_share_an_index() {
    for (short, long) in [
        ("f", "frequency"),
        ("t", "startTime"),
        ("s", "start"),
        ("d", "duration"),
        ("bpm", "beatsPerMeasure"),
        ("ml", "measureLength"),
    ] {
        let short = compile_source(&format!("[1].{short}")).unwrap();
        let long = compile_source(&format!("[1].{long}")).unwrap();
        assert_eq!(short.bytecode(), long.bytecode());
    }
}

#[test]
fn big_integers_round_trip_through_the_wide_encoding() {
    let source = "123456789012345678901234567890 / 2";
    assert_eq!(
        opcodes(source),
        vec![Opcode::LoadConstBig, Opcode::LoadConst, Opcode::Div]
    );
    let compiled = compile_source(source).unwrap();
    let rendered = decompile(compiled.bytecode()).unwrap();
    assert_eq!(
        compile_source(&rendered).unwrap().bytecode(),
        compiled.bytecode()
    );
}
