use std::collections::{BTreeMap, HashMap};

use evalexpr::{
    build_operator_tree, Context, ContextWithMutableFunctions, EvalexprError, EvalexprResult,
    Function, HashMapContext, Node, Value,
};
use thiserror::Error;

use crate::Bindings;

/// Errors raised while compiling or evaluating a metric formula
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("unterminated variable name in expression: {0}")]
    UnterminatedVariable(String),

    #[error("failed to compile expression {expression}: {source}")]
    Compile {
        expression: String,
        #[source]
        source: EvalexprError,
    },

    #[error("failed to evaluate expression {expression}: {source}")]
    Evaluate {
        expression: String,
        #[source]
        source: EvalexprError,
    },

    #[error("expression {expression} produced a non-numeric result: {value}")]
    NonNumeric { expression: String, value: String },

    #[error("expression {expression} produced a non-finite result: {value}")]
    NonFinite { expression: String, value: f64 },
}

/// Compiles formulas once and evaluates them against per-frame bindings
pub trait Evaluator {
    /// Reusable compiled form of a formula
    type Compiled;

    fn compile(&self, expression: &str) -> Result<Self::Compiled, EvaluationError>;

    fn evaluate(&self, compiled: &Self::Compiled, bindings: &Bindings) -> Result<f64, EvaluationError>;
}

/// Function of two reals callable from formulas
pub type BinaryFunction = fn(f64, f64) -> f64;

/// Named functions available to formulas, `max` and `min` by default
#[derive(Clone)]
pub struct FunctionTable {
    functions: BTreeMap<String, BinaryFunction>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register("max", f64::max);
        table.register("min", f64::min);
        table
    }
}

impl FunctionTable {
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    /// Adds a function, replacing any earlier one with the same name
    pub fn register(&mut self, name: impl Into<String>, function: BinaryFunction) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<BinaryFunction> {
        self.functions.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, BinaryFunction)> {
        self.functions.iter().map(|(name, function)| (name.as_str(), *function))
    }
}

/// A formula parsed into an operator tree
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    tree: Node,
    /// Bracketed variable name to the identifier it was rewritten to
    identifiers: HashMap<String, String>,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The identifier a variable is bound to inside the operator tree
    pub fn identifier<'a>(&'a self, variable: &'a str) -> &'a str {
        self.identifiers
            .get(variable)
            .map(String::as_str)
            .unwrap_or(variable)
    }
}

/// [`Evaluator`] backed by `evalexpr`.
///
/// Formulas may use bracketed variable names containing punctuation, e.g.
/// `[cstate_core/c6-residency/] / [TSC]`. Integer literals are treated as reals,
/// so `/` never truncates.
#[derive(Clone)]
pub struct ExpressionEvaluator {
    functions: FunctionTable,
    /// Holds only the registered functions; variables are layered on per call
    function_context: HashMapContext,
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new(FunctionTable::default())
    }
}

impl ExpressionEvaluator {
    pub fn new(functions: FunctionTable) -> Self {
        let mut function_context = HashMapContext::new();
        for (name, function) in functions.iter() {
            // Infallible for HashMapContext
            let _ = function_context.set_function(name.to_string(), binary_function(function));
        }
        Self {
            functions,
            function_context,
        }
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }
}

/// Variable bindings of one evaluation on top of the shared function context
struct FrameContext<'a> {
    functions: &'a HashMapContext,
    values: HashMap<&'a str, Value>,
}

impl Context for FrameContext<'_> {
    fn get_value(&self, identifier: &str) -> Option<&Value> {
        self.values.get(identifier)
    }

    fn call_function(&self, identifier: &str, argument: &Value) -> EvalexprResult<Value> {
        self.functions.call_function(identifier, argument)
    }

    fn are_builtin_functions_disabled(&self) -> bool {
        false
    }

    fn set_builtin_functions_disabled(&mut self, disabled: bool) -> EvalexprResult<()> {
        if disabled {
            Err(EvalexprError::BuiltinFunctionsCannotBeDisabled)
        } else {
            Ok(())
        }
    }
}

impl Evaluator for ExpressionEvaluator {
    type Compiled = CompiledExpression;

    fn compile(&self, expression: &str) -> Result<CompiledExpression, EvaluationError> {
        let (rewritten, identifiers) = rewrite_variables(expression)?;
        let tree = build_operator_tree(&promote_integers(&rewritten)).map_err(|source| {
            EvaluationError::Compile {
                expression: expression.to_string(),
                source,
            }
        })?;
        Ok(CompiledExpression {
            source: expression.to_string(),
            tree,
            identifiers,
        })
    }

    fn evaluate(&self, compiled: &CompiledExpression, bindings: &Bindings) -> Result<f64, EvaluationError> {
        let context = FrameContext {
            functions: &self.function_context,
            values: bindings
                .iter()
                .map(|(name, value)| (compiled.identifier(name), Value::Float(*value)))
                .collect(),
        };
        let value = compiled
            .tree
            .eval_with_context(&context)
            .map_err(|source| EvaluationError::Evaluate {
                expression: compiled.source.clone(),
                source,
            })?;

        let result = match value {
            Value::Float(value) => value,
            Value::Int(value) => value as f64,
            other => {
                return Err(EvaluationError::NonNumeric {
                    expression: compiled.source.clone(),
                    value: other.to_string(),
                })
            }
        };
        if !result.is_finite() {
            return Err(EvaluationError::NonFinite {
                expression: compiled.source.clone(),
                value: result,
            });
        }
        Ok(result)
    }
}

fn binary_function(function: BinaryFunction) -> Function {
    Function::new(move |argument| {
        let arguments = argument.as_fixed_len_tuple(2)?;
        let left = arguments[0].as_number()?;
        let right = arguments[1].as_number()?;
        Ok(Value::Float(function(left, right)))
    })
}

// Replaces every `[name]` with a plain identifier the expression parser accepts.
fn rewrite_variables(expression: &str) -> Result<(String, HashMap<String, String>), EvaluationError> {
    let mut rewritten = String::with_capacity(expression.len());
    let mut identifiers: HashMap<String, String> = HashMap::new();
    let mut rest = expression;

    while let Some(open) = rest.find('[') {
        rewritten.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find(']')
            .ok_or_else(|| EvaluationError::UnterminatedVariable(expression.to_string()))?;
        let name = after[..close].trim();
        let next_index = identifiers.len();
        let identifier = identifiers
            .entry(name.to_string())
            .or_insert_with(|| format!("__var{}", next_index));
        rewritten.push_str(identifier);
        rest = &after[close + 1..];
    }
    rewritten.push_str(rest);

    Ok((rewritten, identifiers))
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

// A number cut off right before the sign of its exponent, as in `1e-9`
fn is_exponent_prefix(word: &str) -> bool {
    word.starts_with(|c: char| c.is_ascii_digit()) && (word.ends_with('e') || word.ends_with('E'))
}

// Appends `.0` to bare integer literals so arithmetic stays in reals.
// Scientific literals are left alone, including their exponent.
fn promote_integers(expression: &str) -> String {
    let mut promoted = String::with_capacity(expression.len() + 8);
    let mut word = String::new();
    let mut chars = expression.chars().peekable();

    while let Some(c) = chars.next() {
        if is_word_char(c) {
            word.push(c);
        } else if (c == '-' || c == '+')
            && is_exponent_prefix(&word)
            && chars.peek().is_some_and(|next| next.is_ascii_digit())
        {
            word.push(c);
        } else {
            flush_word(&mut word, &mut promoted);
            promoted.push(c);
        }
    }
    flush_word(&mut word, &mut promoted);
    promoted
}

fn flush_word(word: &mut String, promoted: &mut String) {
    if !word.is_empty() && word.chars().all(|c| c.is_ascii_digit()) {
        word.push_str(".0");
    }
    promoted.push_str(word);
    word.clear();
}
