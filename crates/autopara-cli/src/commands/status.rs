use crate::cli::StatusArgs;
use crate::error::{CliError, Result};
use autopara::engine::sink::{self, OutputState};

pub fn run(args: StatusArgs) -> Result<()> {
    let state = sink::inspect(&args.output).map_err(|source| CliError::Output {
        path: args.output.clone(),
        source,
    })?;
    println!("{}: {}", args.output.display(), describe(&state));
    Ok(())
}

fn describe(state: &OutputState) -> String {
    match state {
        OutputState::Absent => "absent (no run has started)".to_string(),
        OutputState::Partial {
            records,
            failed,
            torn,
        } => {
            let mut text = format!(
                "partial, {} record(s) stored ({} failed); rerun to resume",
                records, failed
            );
            if *torn {
                text.push_str(", the incomplete last line will be recomputed");
            }
            text
        }
        OutputState::Complete { records, failed } => {
            format!("complete, {} record(s) ({} failed)", records, failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_described() {
        assert!(describe(&OutputState::Absent).starts_with("absent"));
        let partial = describe(&OutputState::Partial {
            records: 12,
            failed: 1,
            torn: true,
        });
        assert!(partial.starts_with("partial, 12 record(s)"));
        assert!(partial.contains("recomputed"));
        assert_eq!(
            describe(&OutputState::Complete {
                records: 23,
                failed: 1
            }),
            "complete, 23 record(s) (1 failed)"
        );
    }
}
