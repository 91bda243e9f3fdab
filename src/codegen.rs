use std::{
    collections::{HashMap, HashSet},
    fmt, mem,
};

use log::debug;

use crate::ast::{ASTNode, BinOp, Expression, Function, Prototype};

/// Semantic failures, detected while generating code rather than while parsing.
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable referenced {0}")]
    UnknownVariable(String),
    #[error("unknown function referenced {0}")]
    UnknownFunction(String),
    #[error("invalid number of args in call {0} expected {1} found {2}")]
    InvalidCall(String, usize, usize),
    #[error("function {0} cannot be redefined")]
    Redefinition(String),
    #[error("function {0} was declared with {1} parameters, found {2}")]
    SignatureMismatch(String, usize, usize),
    #[error("duplicate parameter {1} in function {0}")]
    DuplicateParameter(String, String),
}

/// names in scope while generating a function body
pub type Environment<V> = HashMap<String, V>;

/// A code generator the front end hands parsed nodes to.
///
/// Node traversal lives in [`generate`] and [`compile`]; a backend only
/// supplies the per-shape operations.
pub trait Backend {
    type Value: Clone;
    type Handle;

    /// register a signature; fails when it conflicts with an earlier one
    fn declare_or_define(&mut self, proto: &Prototype) -> Result<Self::Handle, CodegenError>;

    /// start the body of a declared function, returning its parameters
    fn begin_function(
        &mut self,
        function: &Self::Handle,
    ) -> Result<Environment<Self::Value>, CodegenError>;

    fn number(&mut self, value: f64) -> Self::Value;

    fn binary(&mut self, op: BinOp, lhs: Self::Value, rhs: Self::Value) -> Self::Value;

    fn call(&mut self, callee: &str, args: Vec<Self::Value>) -> Result<Self::Value, CodegenError>;

    fn finish_function(
        &mut self,
        function: Self::Handle,
        body: Self::Value,
    ) -> Result<Self::Handle, CodegenError>;

    /// abandon a body after a failure part way through
    fn discard_function(&mut self, function: Self::Handle);
}

pub fn generate<B: Backend>(
    backend: &mut B,
    expr: &Expression,
    env: &Environment<B::Value>,
) -> Result<B::Value, CodegenError> {
    match expr {
        Expression::Literal(value) => Ok(backend.number(*value)),
        Expression::Variable(name) => match env.get(name) {
            Some(value) => Ok(value.clone()),
            None => Err(CodegenError::UnknownVariable(name.clone())),
        },
        Expression::Binary(op, left, right) => {
            let lhs = generate(backend, left, env)?;
            let rhs = generate(backend, right, env)?;
            Ok(backend.binary(*op, lhs, rhs))
        }
        Expression::Call(callee, args) => {
            let mut gened_args = Vec::with_capacity(args.len());
            for arg in args {
                gened_args.push(generate(backend, arg, env)?);
            }
            backend.call(callee, gened_args)
        }
    }
}

fn compile_fn<B: Backend>(backend: &mut B, function: &Function) -> Result<B::Handle, CodegenError> {
    let Function {
        prototype: proto,
        body,
    } = function;
    let handle = backend.declare_or_define(proto)?;
    let named_values = backend.begin_function(&handle)?;

    match generate(backend, body, &named_values) {
        Ok(value) => backend.finish_function(handle, value),
        Err(err) => {
            backend.discard_function(handle);
            Err(err)
        }
    }
}

pub fn compile<B: Backend>(backend: &mut B, node: &ASTNode) -> Result<B::Handle, CodegenError> {
    match node {
        ASTNode::Function(func) => compile_fn(backend, func),
        ASTNode::Extern(proto) => backend.declare_or_define(proto),
    }
}

/// name the anonymous top-level function is emitted under
pub const ANON_NAME: &str = "__anon_expr";

/// render a constant the way LLVM prints doubles: exponent form when it is
/// exact, the raw bit pattern otherwise
fn format_double(value: f64) -> String {
    let short = format!("{:.6e}", value);
    if value.is_finite() && short.parse::<f64>() == Ok(value) {
        if let Some((mantissa, exp)) = short.split_once('e') {
            if let Ok(exp) = exp.parse::<i32>() {
                let sign = if exp < 0 { '-' } else { '+' };
                return format!("{}e{}{:02}", mantissa, sign, exp.abs());
            }
        }
    }
    format!("0x{:016X}", value.to_bits())
}

#[derive(Debug, Clone)]
struct FunctionIr {
    name: String,
    params: Vec<String>,
    body: Option<Vec<String>>,
}

impl fmt::Display for FunctionIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            None => {
                let params = vec!["double"; self.params.len()].join(", ");
                write!(f, "declare double @{}({})", self.name, params)
            }
            Some(instrs) => {
                let params = self
                    .params
                    .iter()
                    .map(|p| format!("double %{}", p))
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(f, "define double @{}({}) {{", self.name, params)?;
                writeln!(f, "entry:")?;
                for instr in instrs {
                    writeln!(f, "  {}", instr)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct FunctionHandle {
    pub name: String,
    /// whether this declaration created the function
    fresh: bool,
}

/// Reference backend emitting LLVM-style textual IR, every value a double.
pub struct IrEmitter {
    module_name: String,
    functions: Vec<FunctionIr>,
    block: Vec<String>,
    used_names: HashSet<String>,
}

impl IrEmitter {
    pub fn new(module_name: impl Into<String>) -> Self {
        IrEmitter {
            module_name: module_name.into(),
            functions: Vec::new(),
            block: Vec::new(),
            used_names: HashSet::new(),
        }
    }

    fn function(&self, name: &str) -> Option<&FunctionIr> {
        self.functions.iter().find(|func| func.name == name)
    }

    fn function_mut(&mut self, name: &str) -> Option<&mut FunctionIr> {
        self.functions.iter_mut().find(|func| func.name == name)
    }

    /// the IR text of one function, as currently declared or defined
    pub fn function_ir(&self, handle: &FunctionHandle) -> Option<String> {
        self.function(&handle.name).map(|func| func.to_string())
    }

    fn temp(&mut self, base: &str) -> String {
        let mut n = 0;
        loop {
            let candidate = if n == 0 {
                base.to_string()
            } else {
                format!("{}{}", base, n)
            };
            if self.used_names.insert(candidate.clone()) {
                return format!("%{}", candidate);
            }
            n += 1;
        }
    }

    fn compare(&mut self, predicate: &str, lhs: String, rhs: String) -> String {
        let cmp = self.temp("cmptmp");
        self.block
            .push(format!("{} = fcmp {} double {}, {}", cmp, predicate, lhs, rhs));
        let result = self.temp("booltmp");
        self.block
            .push(format!("{} = uitofp i1 {} to double", result, cmp));
        result
    }
}

impl std::default::Default for IrEmitter {
    fn default() -> Self {
        IrEmitter::new("my cool jit")
    }
}

impl Backend for IrEmitter {
    type Value = String;
    type Handle = FunctionHandle;

    fn declare_or_define(&mut self, proto: &Prototype) -> Result<FunctionHandle, CodegenError> {
        let mut seen = HashSet::new();
        for param in &proto.params {
            if !seen.insert(param) {
                return Err(CodegenError::DuplicateParameter(
                    proto.name.clone(),
                    param.clone(),
                ));
            }
        }

        let name = if proto.is_anonymous() {
            // only the latest top-level expression is kept
            self.functions.retain(|func| func.name != ANON_NAME);
            ANON_NAME.to_string()
        } else {
            proto.name.clone()
        };

        match self.function_mut(&name) {
            Some(existing) => {
                if existing.params.len() != proto.params.len() {
                    return Err(CodegenError::SignatureMismatch(
                        name,
                        existing.params.len(),
                        proto.params.len(),
                    ));
                }
                if existing.body.is_none() {
                    existing.params = proto.params.clone();
                }
                Ok(FunctionHandle { name, fresh: false })
            }
            None => {
                debug!("declaring {}", name);
                self.functions.push(FunctionIr {
                    name: name.clone(),
                    params: proto.params.clone(),
                    body: None,
                });
                Ok(FunctionHandle { name, fresh: true })
            }
        }
    }

    fn begin_function(
        &mut self,
        function: &FunctionHandle,
    ) -> Result<Environment<String>, CodegenError> {
        let func = match self.function(&function.name) {
            Some(func) => func,
            None => return Err(CodegenError::UnknownFunction(function.name.clone())),
        };
        if func.body.is_some() {
            return Err(CodegenError::Redefinition(function.name.clone()));
        }

        let params = func.params.clone();
        self.block.clear();
        self.used_names = params.iter().cloned().collect();

        let mut named_values = HashMap::with_capacity(params.len());
        for param in params {
            let value = format!("%{}", param);
            named_values.insert(param, value);
        }
        Ok(named_values)
    }

    fn number(&mut self, value: f64) -> String {
        format_double(value)
    }

    fn binary(&mut self, op: BinOp, lhs: String, rhs: String) -> String {
        let (instr, base) = match op {
            BinOp::Add => ("fadd", "addtmp"),
            BinOp::Sub => ("fsub", "subtmp"),
            BinOp::Mul => ("fmul", "multmp"),
            BinOp::Div => ("fdiv", "divtmp"),
            BinOp::Less => return self.compare("ult", lhs, rhs),
            BinOp::Greater => return self.compare("ugt", lhs, rhs),
        };
        let result = self.temp(base);
        self.block
            .push(format!("{} = {} double {}, {}", result, instr, lhs, rhs));
        result
    }

    fn call(&mut self, callee: &str, args: Vec<String>) -> Result<String, CodegenError> {
        let expected = match self.function(callee) {
            Some(func) => func.params.len(),
            None => return Err(CodegenError::UnknownFunction(callee.to_string())),
        };
        if expected != args.len() {
            return Err(CodegenError::InvalidCall(
                callee.to_string(),
                expected,
                args.len(),
            ));
        }

        let args = args
            .iter()
            .map(|arg| format!("double {}", arg))
            .collect::<Vec<_>>()
            .join(", ");
        let result = self.temp("calltmp");
        self.block
            .push(format!("{} = call double @{}({})", result, callee, args));
        Ok(result)
    }

    fn finish_function(
        &mut self,
        function: FunctionHandle,
        body: String,
    ) -> Result<FunctionHandle, CodegenError> {
        self.block.push(format!("ret double {}", body));
        let instrs = mem::take(&mut self.block);
        match self.function_mut(&function.name) {
            Some(func) => {
                func.body = Some(instrs);
                debug!("defined {}", function.name);
                Ok(function)
            }
            None => Err(CodegenError::UnknownFunction(function.name)),
        }
    }

    fn discard_function(&mut self, function: FunctionHandle) {
        self.block.clear();
        if function.fresh {
            self.functions.retain(|func| func.name != function.name);
        }
        debug!("discarded body of {}", function.name);
    }
}

impl fmt::Display for IrEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.module_name)?;
        for func in &self.functions {
            writeln!(f)?;
            writeln!(f, "{}", func)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_all;
    use pretty_assertions::assert_eq;

    fn compile_all(
        codegen: &mut IrEmitter,
        source: &str,
    ) -> Vec<Result<FunctionHandle, CodegenError>> {
        let (nodes, errors) = parse_all(source);
        assert!(errors.is_empty(), "{:?}", errors);
        nodes.iter().map(|node| compile(codegen, node)).collect()
    }

    fn compile_one(codegen: &mut IrEmitter, source: &str) -> Result<String, CodegenError> {
        let mut results = compile_all(codegen, source);
        assert_eq!(results.len(), 1);
        let handle = results.remove(0)?;
        Ok(codegen.function_ir(&handle).unwrap())
    }

    #[test]
    fn codegen_works() {
        let mut codegen = IrEmitter::default();
        let ir = compile_one(&mut codegen, "def foo(a b) a + b").unwrap();
        assert_eq!(
            ir,
            "define double @foo(double %a, double %b) {\n\
             entry:\n  \
             %addtmp = fadd double %a, %b\n  \
             ret double %addtmp\n\
             }"
        );
    }

    #[test]
    fn comparison_and_calls() {
        let mut codegen = IrEmitter::default();
        compile_all(&mut codegen, "extern sin(x)");
        let ir = compile_one(&mut codegen, "def thing(x) sin(x) * x < 2").unwrap();
        assert_eq!(
            ir,
            "define double @thing(double %x) {\n\
             entry:\n  \
             %calltmp = call double @sin(double %x)\n  \
             %multmp = fmul double %calltmp, %x\n  \
             %cmptmp = fcmp ult double %multmp, 2.000000e+00\n  \
             %booltmp = uitofp i1 %cmptmp to double\n  \
             ret double %booltmp\n\
             }"
        );
    }

    #[test]
    fn greater_than_is_unordered_compare() {
        let mut codegen = IrEmitter::default();
        let ir = compile_one(&mut codegen, "def gt(a b) a > b + 1").unwrap();
        assert_eq!(
            ir,
            "define double @gt(double %a, double %b) {\n\
             entry:\n  \
             %addtmp = fadd double %b, 1.000000e+00\n  \
             %cmptmp = fcmp ugt double %a, %addtmp\n  \
             %booltmp = uitofp i1 %cmptmp to double\n  \
             ret double %booltmp\n\
             }"
        );
    }

    #[test]
    fn temporaries_are_unique() {
        let mut codegen = IrEmitter::default();
        let ir = compile_one(&mut codegen, "def f(addtmp) addtmp + addtmp + 1").unwrap();
        assert!(ir.contains("%addtmp1 = fadd double %addtmp, %addtmp"));
        assert!(ir.contains("%addtmp2 = fadd double %addtmp1, 1.000000e+00"));
    }

    #[test]
    fn constants() {
        assert_eq!(format_double(1.0), "1.000000e+00");
        assert_eq!(format_double(0.25), "2.500000e-01");
        assert_eq!(format_double(12345.0), "1.234500e+04");
        assert_eq!(format_double(0.1), "1.000000e-01");
        assert_eq!(format_double(1.0 / 3.0), "0x3FD5555555555555");
    }

    #[test]
    fn semantic_errors() {
        let mut codegen = IrEmitter::default();
        assert_eq!(
            compile_one(&mut codegen, "def f(x) y"),
            Err(CodegenError::UnknownVariable("y".to_string()))
        );
        assert_eq!(
            compile_one(&mut codegen, "nope(1)"),
            Err(CodegenError::UnknownFunction("nope".to_string()))
        );
        compile_all(&mut codegen, "extern pow(a b)");
        assert_eq!(
            compile_one(&mut codegen, "pow(1)"),
            Err(CodegenError::InvalidCall("pow".to_string(), 2, 1))
        );
        assert_eq!(
            compile_one(&mut codegen, "def g(x x) x"),
            Err(CodegenError::DuplicateParameter(
                "g".to_string(),
                "x".to_string()
            ))
        );
    }

    #[test]
    fn failed_definition_is_discarded() {
        let mut codegen = IrEmitter::default();
        assert!(compile_one(&mut codegen, "def f(x) y").is_err());
        assert!(compile_one(&mut codegen, "def f(x) x").is_ok());
    }

    #[test]
    fn failed_definition_keeps_declaration() {
        let mut codegen = IrEmitter::default();
        compile_all(&mut codegen, "extern g(x)");
        assert!(compile_one(&mut codegen, "def g(x) y").is_err());
        assert!(compile_one(&mut codegen, "g(1)").is_ok());
    }

    #[test]
    fn redefinition_is_rejected() {
        let mut codegen = IrEmitter::default();
        let results = compile_all(&mut codegen, "def f(x) x; def f(x) x + 1");
        assert!(results[0].is_ok());
        assert_eq!(
            results[1],
            Err(CodegenError::Redefinition("f".to_string()))
        );
    }

    #[test]
    fn definition_matches_declaration() {
        let mut codegen = IrEmitter::default();
        compile_all(&mut codegen, "extern h(a)");
        assert_eq!(
            compile_one(&mut codegen, "def h(a b) a"),
            Err(CodegenError::SignatureMismatch("h".to_string(), 1, 2))
        );
        let ir = compile_one(&mut codegen, "def h(z) z").unwrap();
        assert!(ir.starts_with("define double @h(double %z)"));
    }

    #[test]
    fn anonymous_expression_is_replaced() {
        let mut codegen = IrEmitter::default();
        let results = compile_all(&mut codegen, "extern sin(x); 1; 2");
        assert!(results.iter().all(|result| result.is_ok()));
        assert_eq!(
            codegen.to_string(),
            "; ModuleID = 'my cool jit'\n\
             \n\
             declare double @sin(double)\n\
             \n\
             define double @__anon_expr() {\n\
             entry:\n  \
             ret double 2.000000e+00\n\
             }\n"
        );
    }
}
