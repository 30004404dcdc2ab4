use crate::language::span::Span;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Component,
    Api,
}

/// One parsed compilation unit: an API (signatures only) or a component
/// (implementation with an executable top level).
#[derive(Clone, Debug)]
pub struct CompilationUnit {
    pub kind: UnitKind,
    pub name: String,
    pub native: bool,
    pub path: Option<PathBuf>,
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,
    pub decls: Vec<Decl>,
    pub span: Span,
}

impl CompilationUnit {
    pub fn is_component(&self) -> bool {
        self.kind == UnitKind::Component
    }

    pub fn is_api(&self) -> bool {
        self.kind == UnitKind::Api
    }

    pub fn tests(&self) -> Vec<String> {
        self.decls
            .iter()
            .filter_map(|decl| match decl {
                Decl::Test(test) => Some(test.name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn exported_api_names(&self) -> Vec<String> {
        self.exports
            .iter()
            .flat_map(|export| export.apis.iter().cloned())
            .collect()
    }
}

#[derive(Clone, Debug)]
pub enum Import {
    /// `import A.{x, y as z}`
    Names {
        api: String,
        names: Vec<AliasedName>,
        span: Span,
    },
    /// `import A.{...} except {x}`
    Star {
        api: String,
        except: Vec<String>,
        span: Span,
    },
    /// `import api A, B`
    Apis { apis: Vec<String>, span: Span },
}

impl Import {
    pub fn span(&self) -> Span {
        match self {
            Import::Names { span, .. } | Import::Star { span, .. } | Import::Apis { span, .. } => {
                *span
            }
        }
    }

    pub fn api_names(&self) -> Vec<&str> {
        match self {
            Import::Names { api, .. } | Import::Star { api, .. } => vec![api.as_str()],
            Import::Apis { apis, .. } => apis.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliasedName {
    pub name: String,
    pub alias: Option<String>,
}

impl AliasedName {
    pub fn visible_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug)]
pub struct Export {
    pub apis: Vec<String>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum Decl {
    Let(ValueDecl),
    Var(ValueDecl),
    Function(FunctionDecl),
    Trait(TraitDecl),
    Object(ObjectDecl),
    Test(FunctionDecl),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Let(decl) | Decl::Var(decl) => &decl.name,
            Decl::Function(decl) | Decl::Test(decl) => &decl.name,
            Decl::Trait(decl) => &decl.name,
            Decl::Object(decl) => &decl.name,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::Let(decl) | Decl::Var(decl) => decl.span,
            Decl::Function(decl) | Decl::Test(decl) => decl.span,
            Decl::Trait(decl) => decl.span,
            Decl::Object(decl) => decl.span,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ValueDecl {
    pub name: String,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Option<Arc<Expr>>,
    pub span: Span,
}

impl FunctionDecl {
    /// Methods that name `self` as their first parameter are functional
    /// methods: callable as top-level functions dispatching on that argument.
    pub fn is_functional(&self) -> bool {
        self.params.first().map(|p| p == "self").unwrap_or(false)
    }

    pub fn is_abstract(&self) -> bool {
        self.body.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct TraitDecl {
    pub name: String,
    pub extends: Vec<String>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ObjectDecl {
    pub name: String,
    /// `None` for singleton objects.
    pub params: Option<Vec<String>>,
    pub extends: Vec<String>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Unit,
    Int(i64),
    Bool(bool),
    Str(String),
    Ident(String),
    SelfRef,
    Tuple(Vec<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Field {
        target: Box<Expr>,
        name: String,
    },
    Assign {
        name: String,
        value: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    While {
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    Block {
        stmts: Vec<Stmt>,
        result: Option<Box<Expr>>,
    },
    Spawn(Arc<Expr>),
    Throw(Box<Expr>),
    Try {
        body: Box<Expr>,
        binder: String,
        handler: Box<Expr>,
    },
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Let {
        name: String,
        mutable: bool,
        value: Expr,
        span: Span,
    },
    Expr(Expr),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}
