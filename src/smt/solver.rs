//! SMT solver driver.
//!
//! Holds one long-lived solver child process (z3 by the default
//! configuration, but anything speaking SMT-LIB v2 with models and unsat
//! cores works) and talks to it over stdin/stdout. Every `check` starts from
//! `(reset)` followed by the fixed preamble, so rounds are independent; a
//! solver that replies `error`/`unsupported` or exits is restarted once
//! before the failure is surfaced.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate, NaiveTime};
use log::{debug, warn};

use crate::error::Error;
use crate::interner::StringInterner;
use crate::report::{TableData, Value};
use crate::schema::{SqlType, TableSchema};
use crate::smt::printer::PREAMBLE;
use crate::smt::term::ChoiceBit;

/// Day 0 of the integer date encoding.
fn date_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1000, 1, 1).expect("valid epoch date")
}

#[derive(Debug)]
pub struct Solver {
    executable: String,
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    /// Whether a session was already written (and must be reset).
    dirty: bool,

    /// Labels of the last unsat core, empty after a sat round.
    pub unsat_core: Vec<String>,
    /// Wall time of the last `(check-sat)`, in seconds.
    pub last_check_secs: f64,
}

impl Solver {
    /// `timeout_secs` becomes the solver's own hard process cap (`-T`), the
    /// backstop behind the orchestrator's wall-clock budget.
    pub fn new(executable: &str, timeout_secs: u64) -> Self {
        Solver {
            executable: executable.to_string(),
            args: vec!["-in".to_string(), format!("-T:{timeout_secs}")],
            child: None,
            stdin: None,
            stdout: None,
            dirty: false,
            unsat_core: Vec::new(),
            last_check_secs: 0.0,
        }
    }

    fn spawn(&mut self) -> Result<()> {
        let mut child = Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn solver `{}`", self.executable))?;
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take().map(BufReader::new);
        self.child = Some(child);
        self.dirty = false;
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.stdin = None;
        self.stdout = None;
        self.spawn()
    }

    fn send(&mut self, text: &str) -> Result<(), Error> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::solver("stdin not available"))?;
        stdin
            .write_all(text.as_bytes())
            .and_then(|_| stdin.flush())
            .map_err(|e| Error::solver(format!("write failed: {e}")))
    }

    fn read_line(&mut self) -> Result<String, Error> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| Error::solver("stdout not available"))?;
        let mut line = String::new();
        let n = stdout
            .read_line(&mut line)
            .map_err(|e| Error::solver(format!("read failed: {e}")))?;
        if n == 0 {
            return Err(Error::solver("solver exited"));
        }
        Ok(line.trim().to_string())
    }

    /// Writes the preamble plus the assertion block and reads the verdict.
    /// On unsat the core labels are fetched immediately and stored.
    pub fn check(&mut self, assertions: &str) -> Result<bool> {
        match self.check_once(assertions) {
            Ok(sat) => Ok(sat),
            Err(e) if e.is_solver() => {
                // one retry on a fresh process
                warn!("solver failed ({e}); retrying on a fresh process");
                self.restart()?;
                self.check_once(assertions).map_err(Into::into)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn check_once(&mut self, assertions: &str) -> Result<bool, Error> {
        if self.child.is_none() {
            self.spawn()
                .map_err(|e| Error::solver(format!("spawn failed: {e:#}")))?;
        }
        let mut script = String::new();
        if self.dirty {
            script.push_str("(reset)\n");
        }
        script.push_str(PREAMBLE);
        script.push_str(assertions);
        script.push_str("(check-sat)\n");
        self.send(&script)?;
        self.dirty = true;

        let start = Instant::now();
        let mut state = self.read_line()?;
        self.last_check_secs = start.elapsed().as_secs_f64();

        loop {
            let lowered = state.to_ascii_lowercase();
            if state == "sat" || state == "unsat" {
                break;
            } else if lowered.contains("error") || lowered.contains("unsupported") {
                return Err(Error::solver(state));
            } else if lowered.contains("warning") {
                warn!("solver: {state}");
            } else {
                debug!("solver: {state}");
            }
            state = self.read_line()?;
        }

        if state == "sat" {
            self.unsat_core.clear();
            return Ok(true);
        }

        self.send("(get-unsat-core)\n")?;
        let core = self.read_line()?;
        self.unsat_core = core
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Ok(false)
    }

    /// `(eval (name args...))` against the model of the last sat round.
    pub fn eval(&mut self, name: &str, args: &[i64]) -> Result<String> {
        let mut command = format!("(eval ({name}");
        for arg in args {
            if *arg < 0 {
                command.push_str(&format!(" (- {})", arg.unsigned_abs()));
            } else {
                command.push_str(&format!(" {arg}"));
            }
        }
        command.push_str("))\n");
        self.send(&command)?;
        let out = self.read_line()?;
        Ok(normalize_integer(&out))
    }

    /// Reads a table's choice vector from the model; bits the solver reports
    /// only symbolically come back as `T`.
    pub fn evaluate_choice_vector(&mut self, table: &TableSchema) -> Result<Vec<ChoiceBit>> {
        let mut vec = Vec::with_capacity(table.choice_len());
        for bit in 0..table.choice_len() {
            let out = self.eval("choice", &[table.table_id, bit as i64])?;
            vec.push(match out.parse::<i64>() {
                Ok(v) => ChoiceBit::Val(v),
                Err(_) => ChoiceBit::Top,
            });
        }
        Ok(vec)
    }

    /// Decodes a table's non-deleted rows from the model.
    pub fn evaluate_table(
        &mut self,
        table: &TableSchema,
        interner: &StringInterner,
    ) -> Result<TableData> {
        let table_id = table.table_id;
        let mut data = TableData {
            columns: table.columns.iter().map(|c| c.column_name.clone()).collect(),
            rows: Vec::new(),
        };

        for row in 0..table.bound {
            if self.eval("deleted", &[table_id, row as i64])? == "true" {
                continue;
            }
            let mut values = Vec::with_capacity(table.width());
            for column in &table.columns {
                let args = [table_id, row as i64, column.column_id as i64];
                if self.eval("null", &args)? == "true" {
                    values.push(Value::Null);
                    continue;
                }
                let raw = self.eval("cell", &args)?;
                let cell: i64 = raw
                    .parse()
                    .map_err(|_| Error::solver(format!("unparseable cell value `{raw}`")))?;
                values.push(decode_value(cell, column.column_type, interner));
            }
            data.rows.push(values);
        }
        Ok(data)
    }
}

impl Drop for Solver {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Solvers print negatives as `(- n)`; normalize to `-n`.
fn normalize_integer(out: &str) -> String {
    let trimmed = out.trim();
    if let Some(inner) = trimmed
        .strip_prefix("(-")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return format!("-{}", inner.trim());
    }
    trimmed.to_string()
}

fn decode_value(cell: i64, ty: SqlType, interner: &StringInterner) -> Value {
    match ty {
        SqlType::Int | SqlType::BigInt | SqlType::Float => Value::Int(cell),
        SqlType::Varchar => Value::Str(interner.decode(cell)),
        SqlType::Bool => Value::Bool(cell != 0),
        SqlType::Date => Value::Date(decode_date(cell)),
        SqlType::Time => Value::Time(decode_time(cell)),
    }
}

/// Days since 1000-01-01, saturating at the printable calendar ends.
fn decode_date(days: i64) -> NaiveDate {
    let epoch = date_epoch();
    let shifted = if days >= 0 {
        epoch.checked_add_days(Days::new(days as u64))
    } else {
        epoch.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.unwrap_or(if days > 0 {
        NaiveDate::from_ymd_opt(9999, 12, 31).expect("valid date")
    } else {
        NaiveDate::from_ymd_opt(1, 1, 1).expect("valid date")
    })
}

/// Seconds since midnight, clamped to one day.
fn decode_time(seconds: i64) -> NaiveTime {
    let clamped = seconds.clamp(0, 86_399) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(clamped, 0).expect("valid time")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_negative_model_values() {
        assert_eq!(normalize_integer("(- 5)"), "-5");
        assert_eq!(normalize_integer("42"), "42");
        assert_eq!(normalize_integer(" true "), "true");
    }

    #[test]
    fn date_round_trip_and_saturation() {
        assert_eq!(
            decode_date(0),
            NaiveDate::from_ymd_opt(1000, 1, 1).unwrap()
        );
        assert_eq!(
            decode_date(365),
            NaiveDate::from_ymd_opt(1001, 1, 1).unwrap()
        );
        assert_eq!(
            decode_date(i64::MAX),
            NaiveDate::from_ymd_opt(9999, 12, 31).unwrap()
        );
        assert_eq!(decode_date(i64::MIN), NaiveDate::from_ymd_opt(1, 1, 1).unwrap());
    }

    #[test]
    fn time_clamps_to_one_day() {
        assert_eq!(
            decode_time(3661),
            NaiveTime::from_hms_opt(1, 1, 1).unwrap()
        );
        assert_eq!(
            decode_time(1_000_000),
            NaiveTime::from_hms_opt(23, 59, 59).unwrap()
        );
        assert_eq!(decode_time(-5), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn values_decode_by_column_type() {
        let mut interner = StringInterner::new();
        let h = interner.intern("alice");
        assert_eq!(
            decode_value(h, SqlType::Varchar, &interner),
            Value::Str("alice".to_string())
        );
        assert_eq!(decode_value(1, SqlType::Bool, &interner), Value::Bool(true));
        assert_eq!(decode_value(7, SqlType::Int, &interner), Value::Int(7));
    }
}
