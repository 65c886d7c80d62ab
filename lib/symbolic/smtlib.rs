//! An SMT-LIB 2 process backend.
//!
//! Path conditions are integer and boolean formulas with nonlinear
//! multiplication, division and modulo, so queries are posed in `QF_NIA`.
//! SMT-LIB `div` and `mod` are Euclidean, which is also what the interpreter
//! computes, so the two agree wherever the divisor is non-zero.

use crate::il;
use crate::symbolic::{Model, Solver, SolverResult, SolverSession, Symbol};
use crate::Error;
use log::{debug, trace, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

/// Talks SMT-LIB 2 to a solver process over its standard input and output.
#[derive(Clone, Debug, PartialEq)]
pub struct SmtLibSolver {
    program: String,
    arguments: Vec<String>,
    timeout: Duration,
}

impl Default for SmtLibSolver {
    fn default() -> SmtLibSolver {
        SmtLibSolver {
            program: "z3".to_string(),
            arguments: vec!["-in".to_string(), "-smt2".to_string()],
            timeout: Duration::from_secs(2),
        }
    }
}

impl SmtLibSolver {
    /// `z3 -in` with a two second timeout per query.
    pub fn new() -> SmtLibSolver {
        SmtLibSolver::default()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Use another solver binary, started with `arguments`, which must make
    /// it read a script from standard input.
    pub fn set_program<S: Into<String>>(mut self, program: S, arguments: Vec<String>) -> Self {
        self.program = program.into();
        self.arguments = arguments;
        self
    }

    /// The time the solver may spend on one query.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Solver for SmtLibSolver {
    fn name(&self) -> &str {
        &self.program
    }

    fn session(&self) -> Result<Box<dyn SolverSession>, Error> {
        Ok(Box::new(SmtLibSession::start(self)?))
    }
}

// Time allowed past the solver's own timeout before the process is killed.
const RESPONSE_SLACK: Duration = Duration::from_millis(500);

struct SmtLibSession {
    solver: SmtLibSolver,
    // `None` after a timeout killed the process, until the next query.
    process: Option<SolverProcess>,
}

struct SolverProcess {
    child: Child,
    stdin: ChildStdin,
    responses: Receiver<String>,
}

impl SolverProcess {
    fn start(solver: &SmtLibSolver) -> Result<SolverProcess, Error> {
        let mut child = Command::new(&solver.program)
            .args(&solver.arguments)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::SolverUnavailable(format!("{}: {}", solver.program, e)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (stdin, stdout) = match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::SolverUnavailable(format!(
                    "no pipes to {}",
                    solver.program
                )));
            }
        };

        let (sender, responses) = channel();
        thread::spawn(move || read_responses(BufReader::new(stdout), sender));

        let mut process = SolverProcess {
            child,
            stdin,
            responses,
        };
        process.send(&format!(
            "(set-option :print-success false)\n\
             (set-option :produce-models true)\n\
             (set-option :timeout {})\n\
             (set-logic QF_NIA)\n",
            solver.timeout.as_millis()
        ))?;
        debug!("started solver {}", solver.program);
        Ok(process)
    }

    fn send(&mut self, script: &str) -> Result<(), Error> {
        trace!("solver <- {}", script.trim_end());
        self.stdin.write_all(script.as_bytes())?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Wait up to `timeout` for the next complete response.
    fn receive(&mut self, timeout: Duration) -> Result<String, Error> {
        let response = match self.responses.recv_timeout(timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => {
                return Err(Error::SolverTimeout(format!(
                    "no response within {} ms",
                    timeout.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::SolverProtocol("solver closed its output".to_string()))
            }
        };
        trace!("solver -> {}", response);
        if response.starts_with("(error") {
            return Err(Error::SolverProtocol(response));
        }
        Ok(response)
    }
}

impl Drop for SolverProcess {
    fn drop(&mut self) {
        let _ = self.stdin.write_all(b"(exit)\n");
        let _ = self.stdin.flush();
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

// Forward every complete response, which may span several lines, until the
// solver closes its output.
fn read_responses(mut stdout: BufReader<ChildStdout>, sender: Sender<String>) {
    let mut response = String::new();
    loop {
        let mut line = String::new();
        match stdout.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        response.push_str(&line);
        if !response.trim().is_empty() && balanced(&response) {
            let complete = response.trim().to_string();
            response.clear();
            if sender.send(complete).is_err() {
                return;
            }
        }
    }
}

impl SmtLibSession {
    fn start(solver: &SmtLibSolver) -> Result<SmtLibSession, Error> {
        Ok(SmtLibSession {
            solver: solver.clone(),
            process: Some(SolverProcess::start(solver)?),
        })
    }

    fn process(&mut self) -> Result<&mut SolverProcess, Error> {
        if self.process.is_none() {
            debug!("restarting solver {}", self.solver.program);
            self.process = Some(SolverProcess::start(&self.solver)?);
        }
        self.process
            .as_mut()
            .ok_or_else(|| Error::SolverUnavailable(self.solver.program.clone()))
    }

    fn query(&mut self, constraints: &[il::Expression], model: bool) -> Result<SolverResult, Error> {
        let symbols: BTreeSet<Symbol> = constraints.iter().flat_map(Symbol::collect).collect();
        let timeout = self.solver.timeout.saturating_add(RESPONSE_SLACK);

        let mut script = String::from("(push 1)\n");
        for symbol in &symbols {
            script.push_str(&format!("(declare-const {} Int)\n", quoted(symbol)?));
        }
        for constraint in constraints {
            script.push_str(&format!("(assert {})\n", to_smtlib(constraint)?));
        }
        script.push_str("(check-sat)\n");

        let process = self.process()?;
        process.send(&script)?;

        match process.receive(timeout)?.as_str() {
            "sat" => {}
            "unsat" => return Ok(SolverResult::Unsat),
            "unknown" => {
                process.send("(get-info :reason-unknown)\n")?;
                let reason = process.receive(timeout)?;
                return Ok(SolverResult::Unknown(reason));
            }
            other => {
                return Err(Error::SolverProtocol(format!(
                    "unexpected check-sat response `{}`",
                    other
                )))
            }
        }

        if !model || symbols.is_empty() {
            return Ok(SolverResult::Sat(Model::new()));
        }

        let names = symbols.iter().map(quoted).collect::<Result<Vec<String>, Error>>()?;
        process.send(&format!("(get-value ({}))\n", names.join(" ")))?;
        let response = process.receive(timeout)?;
        let by_name: BTreeMap<String, Symbol> = symbols
            .into_iter()
            .map(|symbol| (symbol_name(&symbol), symbol))
            .collect();
        match parse_model(&response, &by_name)? {
            Some(model) => Ok(SolverResult::Sat(model)),
            None => Ok(SolverResult::Unknown(
                "model value outside the 64-bit range".to_string(),
            )),
        }
    }
}

impl SolverSession for SmtLibSession {
    fn check(&mut self, constraints: &[il::Expression], model: bool) -> Result<SolverResult, Error> {
        let result = match self.query(constraints, model) {
            Err(Error::SolverTimeout(reason)) => {
                warn!("killing {}: {}", self.solver.program, reason);
                self.process = None;
                return Ok(SolverResult::Unknown(reason));
            }
            result => result,
        };
        // Every query is scoped by its own push, which must be popped even
        // when reading the answer failed.
        let popped = match self.process.as_mut() {
            Some(process) => process.send("(pop 1)\n"),
            None => Ok(()),
        };
        if popped.is_err() {
            self.process = None;
        }
        let result = result?;
        popped?;
        Ok(result)
    }
}

// The name of `symbol` in models.
fn symbol_name(symbol: &Symbol) -> String {
    match symbol {
        Symbol::Parameter(name) => format!("p_{}", name),
        Symbol::Input(name) => format!("i_{}", name),
    }
}

// `symbol` as a quoted SMT-LIB symbol, which may hold any character but `|`
// and `\`.
fn quoted(symbol: &Symbol) -> Result<String, Error> {
    let name = symbol_name(symbol);
    if name.contains(|c: char| c == '|' || c == '\\') {
        return Err(Error::InvalidIr(format!(
            "`{}` cannot be named in SMT-LIB",
            name
        )));
    }
    Ok(format!("|{}|", name))
}

// True once every parenthesis opened in `text` is closed.
fn balanced(text: &str) -> bool {
    let mut depth: i64 = 0;
    let mut quoted = None;
    for c in text.chars() {
        match (quoted, c) {
            (Some(q), c) if c == q => quoted = None,
            (Some(_), _) => {}
            (None, '"') | (None, '|') => quoted = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth -= 1,
            _ => {}
        }
    }
    depth <= 0 && quoted.is_none()
}

/// Render a boolean or integer expression as an SMT-LIB term.
pub fn to_smtlib(expression: &il::Expression) -> Result<String, Error> {
    let binary = |op: &str, lhs: &il::Expression, rhs: &il::Expression| -> Result<String, Error> {
        Ok(format!("({} {} {})", op, to_smtlib(lhs)?, to_smtlib(rhs)?))
    };
    Ok(match expression {
        il::Expression::Constant(il::Constant::Integer(value)) => {
            if *value < 0 {
                format!("(- {})", value.unsigned_abs())
            } else {
                value.to_string()
            }
        }
        il::Expression::Constant(il::Constant::Boolean(value)) => value.to_string(),
        il::Expression::Variable(name) => quoted(&Symbol::Parameter(name.clone()))?,
        il::Expression::Input(name) => quoted(&Symbol::Input(name.clone()))?,
        il::Expression::PenDown => {
            return Err(Error::InvalidIr(
                "the pen state must be concrete in a path condition".to_string(),
            ))
        }
        il::Expression::Add(lhs, rhs) => binary("+", lhs, rhs)?,
        il::Expression::Sub(lhs, rhs) => binary("-", lhs, rhs)?,
        il::Expression::Mul(lhs, rhs) => binary("*", lhs, rhs)?,
        il::Expression::Div(lhs, rhs) => binary("div", lhs, rhs)?,
        il::Expression::Mod(lhs, rhs) => binary("mod", lhs, rhs)?,
        il::Expression::Neg(e) => format!("(- {})", to_smtlib(e)?),
        il::Expression::Cmpeq(lhs, rhs) => binary("=", lhs, rhs)?,
        il::Expression::Cmpneq(lhs, rhs) => binary("distinct", lhs, rhs)?,
        il::Expression::Cmplt(lhs, rhs) => binary("<", lhs, rhs)?,
        il::Expression::Cmple(lhs, rhs) => binary("<=", lhs, rhs)?,
        il::Expression::Cmpgt(lhs, rhs) => binary(">", lhs, rhs)?,
        il::Expression::Cmpge(lhs, rhs) => binary(">=", lhs, rhs)?,
        il::Expression::And(lhs, rhs) => binary("and", lhs, rhs)?,
        il::Expression::Or(lhs, rhs) => binary("or", lhs, rhs)?,
        il::Expression::Not(e) => format!("(not {})", to_smtlib(e)?),
    })
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum SExpr {
    Atom(String),
    List(Vec<SExpr>),
}

fn parse_sexpr(text: &str) -> Result<SExpr, Error> {
    let mut stack: Vec<Vec<SExpr>> = vec![Vec::new()];
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' => stack.push(Vec::new()),
            ')' => {
                let list = stack
                    .pop()
                    .ok_or_else(|| Error::SolverProtocol(format!("unbalanced `{}`", text)))?;
                stack
                    .last_mut()
                    .ok_or_else(|| Error::SolverProtocol(format!("unbalanced `{}`", text)))?
                    .push(SExpr::List(list));
            }
            c if c.is_whitespace() => {}
            '|' => {
                let atom: String = chars.by_ref().take_while(|c| *c != '|').collect();
                if let Some(top) = stack.last_mut() {
                    top.push(SExpr::Atom(atom));
                }
            }
            c => {
                let mut atom = c.to_string();
                while let Some(next) = chars.peek() {
                    if next.is_whitespace() || *next == '(' || *next == ')' {
                        break;
                    }
                    atom.push(*next);
                    chars.next();
                }
                if let Some(top) = stack.last_mut() {
                    top.push(SExpr::Atom(atom));
                }
            }
        }
    }
    match stack.pop() {
        Some(mut top) if stack.is_empty() && top.len() == 1 => Ok(top.remove(0)),
        _ => Err(Error::SolverProtocol(format!("malformed response `{}`", text))),
    }
}

// `5`, or `(- 5)` for negative values.
fn integer_value(value: &SExpr) -> Option<i64> {
    match value {
        SExpr::Atom(digits) => digits.parse().ok(),
        SExpr::List(items) => match items.as_slice() {
            [SExpr::Atom(minus), SExpr::Atom(digits)] if minus == "-" => {
                let magnitude: i128 = digits.parse().ok()?;
                i64::try_from(-magnitude).ok()
            }
            _ => None,
        },
    }
}

/// Parse a `get-value` response. `None` if a value does not fit in an `i64`.
fn parse_model(response: &str, symbols: &BTreeMap<String, Symbol>) -> Result<Option<Model>, Error> {
    let pairs = match parse_sexpr(response)? {
        SExpr::List(pairs) => pairs,
        SExpr::Atom(atom) => {
            return Err(Error::SolverProtocol(format!("expected a model, got `{}`", atom)))
        }
    };

    let mut model = Model::new();
    for pair in pairs {
        let (name, value) = match pair {
            SExpr::List(mut items) if items.len() == 2 => {
                let value = items.remove(1);
                match items.remove(0) {
                    SExpr::Atom(name) => (name, value),
                    SExpr::List(_) => {
                        return Err(Error::SolverProtocol(format!("bad model entry in `{}`", response)))
                    }
                }
            }
            _ => return Err(Error::SolverProtocol(format!("bad model entry in `{}`", response))),
        };
        let symbol = symbols
            .get(&name)
            .ok_or_else(|| Error::SolverProtocol(format!("unknown symbol `{}` in model", name)))?;
        match integer_value(&value) {
            Some(value) => {
                model.insert(symbol.clone(), value);
            }
            None => return Ok(None),
        }
    }
    Ok(Some(model))
}
