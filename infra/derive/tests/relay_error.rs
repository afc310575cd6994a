#[test]
fn relay_error_ui() {
    let t = trybuild::TestCases::new();
    t.pass("tests/ui/relay_error_pass.rs");
}
