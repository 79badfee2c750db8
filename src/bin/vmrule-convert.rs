use neco_apps_test::manifest::convert_vmrules;
use std::io::{Read, Write};

/// Reads VMRule manifests on stdin and prints them as one Prometheus rule file
fn main() -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let rules = convert_vmrules(&input)?;
    std::io::stdout().write_all(rules.as_bytes())?;
    Ok(())
}
