//! Template AST.
//!
//! Nodes keep byte spans into the source rather than a re-displayable form;
//! the converter recovers whitespace and comments from the gaps between spans.

use super::lexer::RelOp;
use super::source::Span;

/// A directive start tag, like `<#if x>` or `[#else/]`.
#[derive(Debug, Clone, PartialEq)]
pub struct StartTag {
    /// From the tag begin character to after the tag end character
    pub span: Span,
    pub name: String,
    /// Offset right after the directive name
    pub name_end: usize,
    /// The `>`, `]`, `/>` or `/]` closing the tag
    pub close: Span,
}

impl StartTag {
    /// Whether the tag was closed with `/>` or `/]`.
    pub fn is_empty(&self) -> bool {
        self.close.len() == 2
    }
}

/// A directive end tag, like `</#if>`.
#[derive(Debug, Clone, PartialEq)]
pub struct EndTag {
    pub span: Span,
    pub name: String,
    pub name_end: usize,
    pub close: Span,
}

/// A loop variable or other bare name that is printed verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Name {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedArg {
    pub name: String,
    pub name_span: Span,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Text(Span),
    /// `<#-- ... -->`
    Comment(Span),
    Header(Header),
    Interpolation(Interpolation),
    NumericalInterpolation(NumericalInterpolation),
    /// `<#comment>...</#comment>`
    LegacyComment(RawBlock),
    NoParse(RawBlock),
    If(IfBlock),
    Switch(SwitchBlock),
    List(ListBlock),
    Items(ItemsBlock),
    Sep(SepBlock),
    Break(StartTag),
    Macro(MacroDef),
    Nested(NestedDirective),
    Return(ReturnDirective),
    Assign(AssignDirective),
    BlockAssign(BlockAssign),
    Attempt(AttemptBlock),
    Block(GenericBlock),
    Escape(EscapeBlock),
    OutputFormat(OutputFormatBlock),
    Simple(SimpleDirective),
    Stop(StopDirective),
    Import(ImportDirective),
    Include(IncludeDirective),
    Setting(SettingDirective),
    Visit(VisitDirective),
    UserDirective(UserDirective),
    LegacyCall(LegacyCall),
    Transform(TransformBlock),
}

/// The `#ftl` header together with whatever precedes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub tag: StartTag,
    pub params: Vec<NamedArg>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    /// From `$` to after `}`
    pub span: Span,
    pub expr: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberFormat {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericalInterpolation {
    pub span: Span,
    pub expr: Expr,
    pub format: Option<NumberFormat>,
}

/// A directive whose content is not parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub tag: StartTag,
    pub content: Span,
    pub end: EndTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfKind {
    If,
    ElseIf,
    Else,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    pub kind: IfKind,
    pub tag: StartTag,
    pub condition: Option<Expr>,
    pub body: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    pub branches: Vec<IfBranch>,
    pub end: EndTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub tag: StartTag,
    /// `None` for `#default`
    pub value: Option<Expr>,
    pub body: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchBlock {
    pub tag: StartTag,
    pub value: Expr,
    /// Whatever stands between the start tag and the first case
    pub leading: Vec<Element>,
    pub cases: Vec<SwitchCase>,
    pub end: EndTag,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListForm {
    /// `list xs [as x[, y]]`
    List { source: Expr, loop_vars: Vec<Name> },
    /// `foreach x in xs`
    Foreach { var: Name, source: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseBranch {
    pub tag: StartTag,
    pub body: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListBlock {
    pub tag: StartTag,
    pub form: ListForm,
    pub body: Vec<Element>,
    pub else_branch: Option<ElseBranch>,
    pub end: EndTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemsBlock {
    pub tag: StartTag,
    pub loop_vars: Vec<Name>,
    pub body: Vec<Element>,
    pub end: EndTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SepBlock {
    pub tag: StartTag,
    pub body: Vec<Element>,
    pub end: Option<EndTag>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroParam {
    pub name: Name,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroDef {
    pub tag: StartTag,
    pub function: bool,
    /// The macro name; either an identifier or a string literal
    pub name_span: Span,
    pub params: Vec<MacroParam>,
    /// Catch-all parameter name and the end of its `...`
    pub catch_all: Option<(Name, usize)>,
    pub open_paren: Option<Span>,
    pub close_paren: Option<Span>,
    pub body: Vec<Element>,
    pub end: EndTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NestedDirective {
    pub tag: StartTag,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnDirective {
    pub tag: StartTag,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignScope {
    Assign,
    Global,
    Local,
}

impl AssignScope {
    pub fn tag_name(&self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Global => "global",
            Self::Local => "local",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub target: Span,
    /// `=`, a compound operator, `++` or `--`
    pub op: Span,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignDirective {
    pub tag: StartTag,
    pub scope: AssignScope,
    pub assignments: Vec<Assignment>,
    pub namespace: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockAssign {
    pub tag: StartTag,
    pub scope: AssignScope,
    pub target: Span,
    pub namespace: Option<Expr>,
    pub body: Vec<Element>,
    pub end: EndTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptBlock {
    pub tag: StartTag,
    pub body: Vec<Element>,
    pub recover: StartTag,
    pub recover_body: Vec<Element>,
    /// `</#attempt>`, or `</#recover>` in old templates
    pub end: EndTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Compress,
    AutoEsc,
    NoAutoEsc,
    NoEscape,
}

impl BlockKind {
    pub fn fm3_name(&self) -> &'static str {
        match self {
            Self::Compress => "compress",
            Self::AutoEsc => "autoEsc",
            Self::NoAutoEsc => "noAutoEsc",
            Self::NoEscape => "noEscape",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericBlock {
    pub tag: StartTag,
    pub kind: BlockKind,
    pub body: Vec<Element>,
    pub end: EndTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EscapeBlock {
    pub tag: StartTag,
    pub var: Name,
    pub expr: Expr,
    pub body: Vec<Element>,
    pub end: EndTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputFormatBlock {
    pub tag: StartTag,
    pub value: Expr,
    pub body: Vec<Element>,
    pub end: EndTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleKind {
    Flush,
    Fallback,
    T,
    Lt,
    Rt,
    Nt,
}

impl SimpleKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flush => "flush",
            Self::Fallback => "fallback",
            Self::T => "t",
            Self::Lt => "lt",
            Self::Rt => "rt",
            Self::Nt => "nt",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleDirective {
    pub tag: StartTag,
    pub kind: SimpleKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopDirective {
    pub tag: StartTag,
    pub message: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDirective {
    pub tag: StartTag,
    pub path: Expr,
    pub namespace: Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeParamKind {
    Parse,
    Encoding,
    IgnoreMissing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncludeParam {
    pub kind: IncludeParamKind,
    pub arg: NamedArg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncludeDirective {
    pub tag: StartTag,
    pub path: Expr,
    pub params: Vec<IncludeParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettingDirective {
    pub tag: StartTag,
    pub name: Name,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisitDirective {
    pub tag: StartTag,
    pub recurse: bool,
    pub node: Option<Expr>,
    pub namespace: Option<Expr>,
}

/// End tag of a user directive call: `</@>` or `</@name>`.
#[derive(Debug, Clone, PartialEq)]
pub struct UserEndTag {
    pub span: Span,
    /// Offset right after `/@`
    pub name_start: usize,
    pub close: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserDirective {
    /// Offset of the tag begin character
    pub start: usize,
    pub callee: Expr,
    pub positional: Vec<Expr>,
    pub named: Vec<NamedArg>,
    pub loop_vars: Vec<Name>,
    pub close: Span,
    pub body: Option<(Vec<Element>, UserEndTag)>,
}

/// `<#call name args>`
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyCall {
    pub tag: StartTag,
    pub callee: Expr,
    pub parens: Option<(Span, Span)>,
    pub positional: Vec<Expr>,
    pub named: Vec<NamedArg>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformBlock {
    pub tag: StartTag,
    pub callee: Expr,
    pub params: Vec<NamedArg>,
    pub body: Vec<Element>,
    pub end: EndTag,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Equals,
    NotEquals,
    Relational(RelOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// `..`, possibly right-unbounded
    Inclusive,
    /// `..<` or `..!`
    Exclusive,
    /// `..*`
    Limited,
}

/// A string literal with `${...}` inside, parsed from its decoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedString {
    /// The decoded value
    pub text: String,
    /// Source offset for every byte of `text`, plus one for its end
    pub offsets: Vec<usize>,
    pub parts: Vec<StringPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    /// Span into the decoded text
    Text(Span),
    Interpolation(Element),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    pub span: Span,
    pub raw: bool,
    pub quote: char,
    pub value: String,
    pub interpolations: Option<InterpolatedString>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashEntry {
    pub key: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identifier {
        span: Span,
        name: String,
    },
    Number(Span),
    Boolean(Span),
    String(StringLiteral),
    List {
        span: Span,
        items: Vec<Expr>,
    },
    Hash {
        span: Span,
        entries: Vec<HashEntry>,
    },
    Range {
        span: Span,
        kind: RangeKind,
        lhs: Box<Expr>,
        rhs: Option<Box<Expr>>,
    },
    Binary {
        span: Span,
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Comparison {
        span: Span,
        op: ComparisonOp,
        op_span: Span,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And {
        span: Span,
        op_span: Span,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Or {
        span: Span,
        op_span: Span,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not {
        span: Span,
        operand: Box<Expr>,
    },
    UnaryPlusMinus {
        span: Span,
        operand: Box<Expr>,
    },
    Paren {
        span: Span,
        inner: Box<Expr>,
    },
    MethodCall {
        span: Span,
        target: Box<Expr>,
        args: Vec<Expr>,
    },
    DynamicKey {
        span: Span,
        target: Box<Expr>,
        key: Box<Expr>,
    },
    Dot {
        span: Span,
        target: Box<Expr>,
        name: String,
        name_span: Span,
    },
    BuiltIn {
        span: Span,
        target: Box<Expr>,
        name: String,
        name_span: Span,
    },
    BuiltinVariable {
        span: Span,
        name: String,
        name_span: Span,
    },
    DefaultTo {
        span: Span,
        target: Box<Expr>,
        rhs: Option<Box<Expr>>,
    },
    Exists {
        span: Span,
        target: Box<Expr>,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Identifier { span, .. }
            | Expr::List { span, .. }
            | Expr::Hash { span, .. }
            | Expr::Range { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Comparison { span, .. }
            | Expr::And { span, .. }
            | Expr::Or { span, .. }
            | Expr::Not { span, .. }
            | Expr::UnaryPlusMinus { span, .. }
            | Expr::Paren { span, .. }
            | Expr::MethodCall { span, .. }
            | Expr::DynamicKey { span, .. }
            | Expr::Dot { span, .. }
            | Expr::BuiltIn { span, .. }
            | Expr::BuiltinVariable { span, .. }
            | Expr::DefaultTo { span, .. }
            | Expr::Exists { span, .. } => *span,
            Expr::Number(span) | Expr::Boolean(span) => *span,
            Expr::String(lit) => lit.span,
        }
    }

    pub fn start(&self) -> usize {
        self.span().start
    }

    pub fn end(&self) -> usize {
        self.span().end
    }

    /// An `x?default(...)` call.
    pub fn is_default_call(&self) -> bool {
        matches!(self, Expr::MethodCall { target, .. }
            if matches!(target.as_ref(), Expr::BuiltIn { name, .. } if name == "default"))
    }

    /// Expressions that can be followed by a postfix operator without
    /// parentheses, in both languages.
    pub fn is_primary_like(&self) -> bool {
        match self {
            Expr::MethodCall { .. } => !self.is_default_call(),
            Expr::BuiltIn { name, .. } => {
                !matches!(name.as_str(), "if_exists" | "ifExists" | "exists")
            }
            Expr::Identifier { .. }
            | Expr::Number(_)
            | Expr::Boolean(_)
            | Expr::String(_)
            | Expr::List { .. }
            | Expr::Hash { .. }
            | Expr::Paren { .. }
            | Expr::DynamicKey { .. }
            | Expr::BuiltinVariable { .. }
            | Expr::Dot { .. } => true,
            _ => false,
        }
    }

    /// Identifier, or a dotted path of identifiers like `a.b.c`.
    pub fn is_identifier_path(&self) -> bool {
        match self {
            Expr::Identifier { .. } => true,
            Expr::Dot { target, name, .. } => {
                name != "*" && name != "**" && target.is_identifier_path()
            }
            _ => false,
        }
    }
}
