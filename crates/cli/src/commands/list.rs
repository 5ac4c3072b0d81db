use anyhow::Result;
use queryrunner_core::PreparedQueries;

pub fn list_command(queries: &PreparedQueries) -> Result<()> {
    print!("{}", format_list(queries));
    Ok(())
}

/// One tab-separated `name runner_type description` line per query
pub fn format_list(queries: &PreparedQueries) -> String {
    let mut out = String::from("query list:\n");
    for query in queries {
        out.push_str(&format!(
            "\t{}\t{}\t{}\n",
            query.name(),
            query.runner_type(),
            query.description()
        ));
    }
    out
}
