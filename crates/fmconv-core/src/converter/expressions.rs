//! Conversion of expressions.

use super::{has_comment, remove_outside_comments, ExprContext, SourceConverter};
use crate::error::Result;
use crate::legacy::ast::{ComparisonOp, Expr, StringLiteral, StringPart};
use crate::legacy::lexer::{skip_trivia, RelOp};
use crate::legacy::strings;
use crate::legacy::Span;
use crate::naming;

/// Names that are operators in FreeMarker 3, so they can't be variable names.
const NEW_KEYWORDS: &[&str] = &["and", "or", "le", "ge"];

impl<'t, 'm> SourceConverter<'t, 'm> {
    /// Prints an expression into a new string instead of the output.
    pub(super) fn expression_text(&mut self, expr: &'t Expr) -> Result<String> {
        let saved_out = std::mem::take(&mut self.out);
        let result = self.expr(expr, ExprContext::Free);
        let text = std::mem::replace(&mut self.out, saved_out);
        result.map(|()| text)
    }

    pub(super) fn expr(&mut self, expr: &'t Expr, ctx: ExprContext) -> Result<()> {
        match expr {
            Expr::Identifier { span, name } => {
                if NEW_KEYWORDS.contains(&name.as_str()) {
                    return Err(self.unconvertable(
                        format!(
                            "\"{name}\" is a keyword in FreeMarker 3, so it can't be used as \
                             an identifier. You have to rename it manually before conversion."
                        ),
                        span.start,
                    ));
                }
                self.copy(span.start, span.end);
                Ok(())
            }
            Expr::Number(span) | Expr::Boolean(span) => {
                self.copy(span.start, span.end);
                Ok(())
            }
            Expr::String(literal) => self.string_literal(literal),
            Expr::List { span, items } => {
                let Some(first) = items.first() else {
                    self.copy(span.start, span.end);
                    return Ok(());
                };
                self.copy(span.start, first.start());
                self.expr(first, ExprContext::Free)?;
                let mut pos = first.end();
                for item in &items[1..] {
                    let gap = self.gap(pos, item.start());
                    self.separator_gap(gap);
                    self.expr(item, ExprContext::Free)?;
                    pos = item.end();
                }
                self.copy(pos, span.end);
                Ok(())
            }
            Expr::Hash { span, entries } => {
                let children: Vec<_> = entries
                    .iter()
                    .flat_map(|entry| [&entry.key, &entry.value])
                    .map(|child| (child, ExprContext::Free))
                    .collect();
                self.with_children(*span, &children)
            }
            Expr::Range { span, lhs, rhs, .. } => {
                let mut children = vec![(lhs.as_ref(), ExprContext::Free)];
                if let Some(rhs) = rhs {
                    children.push((rhs.as_ref(), ExprContext::Free));
                }
                self.with_children(*span, &children)
            }
            Expr::Binary { span, lhs, rhs, .. } => self.with_children(
                *span,
                &[(lhs.as_ref(), ExprContext::Free), (rhs.as_ref(), ExprContext::Free)],
            ),
            Expr::Comparison {
                op, op_span, lhs, rhs, ..
            } => {
                let source_op = op_span.text(self.src);
                let converted = match (op, source_op) {
                    (ComparisonOp::Equals, _) => "==",
                    (ComparisonOp::NotEquals, _) => "!=",
                    (ComparisonOp::Relational(_), "<" | "<=" | ">" | ">=") => source_op,
                    (ComparisonOp::Relational(RelOp::Lt), _) => "lt",
                    (ComparisonOp::Relational(RelOp::Le), _) => "le",
                    (ComparisonOp::Relational(RelOp::Gt), _) => "gt",
                    (ComparisonOp::Relational(RelOp::Ge), _) => "ge",
                };
                self.binary_operator(lhs, *op_span, converted, rhs)
            }
            Expr::And {
                op_span, lhs, rhs, ..
            } => {
                let converted = match op_span.text(self.src) {
                    "&&" | "&" => "&&",
                    _ => "and",
                };
                self.binary_operator(lhs, *op_span, converted, rhs)
            }
            Expr::Or {
                op_span, lhs, rhs, ..
            } => {
                let converted = match op_span.text(self.src) {
                    "||" | "|" => "||",
                    _ => "or",
                };
                self.binary_operator(lhs, *op_span, converted, rhs)
            }
            Expr::Not { span, operand }
            | Expr::UnaryPlusMinus { span, operand }
            | Expr::Paren {
                span,
                inner: operand,
            } => self.with_children(*span, &[(operand.as_ref(), ExprContext::Free)]),
            Expr::MethodCall { span, target, args } => {
                if expr.is_default_call() {
                    return self.default_call(expr, ctx);
                }
                let mut children = vec![(target.as_ref(), ExprContext::Accessor)];
                children.extend(args.iter().map(|arg| (arg, ExprContext::Free)));
                self.with_children(*span, &children)
            }
            Expr::DynamicKey { span, target, key } => {
                self.expr(target, ExprContext::Accessor)?;
                self.copy(target.end(), key.start());
                let renamed = match key.as_ref() {
                    Expr::String(StringLiteral {
                        raw: false,
                        quote,
                        value,
                        interpolations: None,
                        ..
                    }) => naming::dom_key(value).map(|renamed| (renamed, *quote)),
                    _ => None,
                };
                match renamed {
                    Some((renamed, quote)) => {
                        self.out.push(quote);
                        self.out.push_str(&strings::escape(&renamed, quote));
                        self.out.push(quote);
                    }
                    None => self.expr(key, ExprContext::Free)?,
                }
                self.copy(key.end(), span.end);
                Ok(())
            }
            Expr::Dot {
                span,
                target,
                name,
                name_span,
            } => {
                self.expr(target, ExprContext::Accessor)?;
                self.copy(target.end(), name_span.start);
                match naming::dom_key(name) {
                    Some(renamed) => self.out.push_str(&renamed),
                    None => self.copy(name_span.start, name_span.end),
                }
                self.copy(name_span.end, span.end);
                Ok(())
            }
            Expr::BuiltIn {
                target,
                name,
                name_span,
                ..
            } => match name.as_str() {
                "exists" => self.exists_built_in(target, *name_span),
                "if_exists" | "ifExists" => self.if_exists_built_in(target, *name_span, ctx),
                "default" => Err(self.unconvertable(
                    "?default without a parameter list can't be converted automatically; \
                     use the \"!\" operator instead.",
                    target.start(),
                )),
                _ => {
                    let candidate = naming::built_in_candidate(name);
                    if !naming::is_fm3_built_in(&candidate) {
                        return Err(self.failed_at(
                            format!(
                                "Couldn't map \"{name}\" to a valid FreeMarker 3 built-in name \
                                 (tried: {candidate})"
                            ),
                            name_span.start,
                        ));
                    }
                    self.expr(target, ExprContext::BuiltInTarget)?;
                    self.copy(target.end(), name_span.start);
                    self.out.push_str(&candidate);
                    Ok(())
                }
            },
            Expr::BuiltinVariable {
                span,
                name,
                name_span,
            } => {
                let candidate = naming::built_in_variable_candidate(name);
                if !naming::is_fm3_built_in_variable(&candidate) {
                    return Err(self.failed_at(
                        format!(
                            "Couldn't map \"{name}\" to a valid FreeMarker 3 built-in variable \
                             name (tried: {candidate})"
                        ),
                        name_span.start,
                    ));
                }
                self.copy(span.start, name_span.start);
                self.out.push_str(&candidate);
                Ok(())
            }
            Expr::DefaultTo { span, target, rhs } => {
                self.expr(target, ExprContext::DefaultToTarget)?;
                match rhs {
                    Some(rhs) => {
                        self.copy(target.end(), rhs.start());
                        self.default_value(rhs)?;
                        self.copy(rhs.end(), span.end);
                    }
                    None => self.copy(target.end(), span.end),
                }
                Ok(())
            }
            Expr::Exists { span, target } => {
                self.expr(target, ExprContext::ExistsTarget)?;
                self.copy(target.end(), span.end);
                Ok(())
            }
        }
    }

    /// Copies the source of `span` while converting the given sub-expressions,
    /// which must be in source order.
    fn with_children(&mut self, span: Span, children: &[(&'t Expr, ExprContext)]) -> Result<()> {
        let mut pos = span.start;
        for (child, ctx) in children {
            self.copy(pos, child.start());
            self.expr(child, *ctx)?;
            pos = child.end();
        }
        self.copy(pos, span.end);
        Ok(())
    }

    /// Prints a binary operator expression. Word operators get surrounding
    /// spaces if the source had none.
    fn binary_operator(
        &mut self,
        lhs: &'t Expr,
        op_span: Span,
        converted: &str,
        rhs: &'t Expr,
    ) -> Result<()> {
        let is_word = converted.starts_with(|c: char| c.is_ascii_alphabetic());
        self.expr(lhs, ExprContext::Free)?;
        self.copy(lhs.end(), op_span.start);
        if is_word && lhs.end() == op_span.start {
            self.out.push(' ');
        }
        self.out.push_str(converted);
        if is_word && op_span.end == rhs.start() {
            self.out.push(' ');
        }
        self.copy(op_span.end, rhs.start());
        self.expr(rhs, ExprContext::Free)
    }

    /// The right side of `!`, parenthesized if FreeMarker 3 would parse it
    /// differently.
    fn default_value(&mut self, value: &'t Expr) -> Result<()> {
        let keep = value.is_primary_like()
            || matches!(value, Expr::DefaultTo { .. } | Expr::Exists { .. });
        if keep {
            self.expr(value, ExprContext::Free)
        } else {
            self.out.push('(');
            self.expr(value, ExprContext::Free)?;
            self.out.push(')');
            Ok(())
        }
    }

    /// Offset of the `?` between a built-in target and the built-in name.
    fn question_mark(&self, target: &Expr) -> usize {
        skip_trivia(self.src, target.end()).unwrap_or(target.end())
    }

    /// `x?exists` becomes `x??`.
    fn exists_built_in(&mut self, target: &'t Expr, name_span: Span) -> Result<()> {
        self.expr(target, ExprContext::ExistsTarget)?;
        let question = self.question_mark(target);
        let before = self.gap(target.end(), question);
        if has_comment(before) {
            self.out.push_str(before);
        }
        self.out.push_str("??");
        self.copy(question + 1, name_span.start);
        Ok(())
    }

    /// `x?if_exists` becomes `x!`.
    fn if_exists_built_in(
        &mut self,
        target: &'t Expr,
        name_span: Span,
        ctx: ExprContext,
    ) -> Result<()> {
        let parenthesize = ctx == ExprContext::Accessor;
        if parenthesize {
            self.out.push('(');
        }
        self.expr(target, ExprContext::DefaultToTarget)?;
        let question = self.question_mark(target);
        for gap in [
            self.gap(target.end(), question),
            self.gap(question + 1, name_span.start),
        ] {
            if has_comment(gap) {
                self.out.push_str(gap);
            }
        }
        self.out.push('!');
        if parenthesize {
            self.out.push(')');
        }
        Ok(())
    }

    /// `x?default(a, b)` becomes `x!a!b`.
    fn default_call(&mut self, call: &'t Expr, ctx: ExprContext) -> Result<()> {
        let Expr::MethodCall { span, target, args } = call else {
            return Ok(());
        };
        let Expr::BuiltIn {
            target: lhs,
            name_span,
            ..
        } = target.as_ref()
        else {
            return Ok(());
        };
        if args.is_empty() {
            return Err(self.unconvertable(
                "?default with no arguments can't be converted automatically; use the \"!\" \
                 operator instead.",
                lhs.start(),
            ));
        }

        let parenthesize = ctx != ExprContext::Free;
        if parenthesize {
            self.out.push('(');
        }
        self.expr(lhs, ExprContext::DefaultToTarget)?;
        let question = self.question_mark(lhs);
        let open_paren = skip_trivia(self.src, name_span.end).unwrap_or(name_span.end);
        for gap in [
            self.gap(lhs.end(), question),
            self.gap(question + 1, name_span.start),
            self.gap(name_span.end, open_paren),
        ] {
            if has_comment(gap) {
                self.out.push_str(gap);
            }
        }

        let mut pos = open_paren + 1;
        for (i, arg) in args.iter().enumerate() {
            let gap = self.gap(pos, arg.start());
            if i == 0 {
                if has_comment(gap) {
                    self.out.push('!');
                    self.out.push_str(gap);
                } else if gap.contains('\n') {
                    self.out.push_str(gap);
                    self.out.push('!');
                } else {
                    self.out.push('!');
                }
            } else {
                let gap = remove_outside_comments(gap, ',');
                if has_comment(&gap) {
                    self.out.push_str(gap.trim_end());
                    self.out.push_str(" !");
                } else {
                    self.out.push('!');
                }
            }
            self.default_value(arg)?;
            pos = arg.end();
        }
        let trailing = self.gap(pos, span.end - 1);
        if has_comment(trailing) {
            self.out.push_str(trailing.trim_end());
        }

        if parenthesize {
            self.out.push(')');
        }
        Ok(())
    }

    fn string_literal(&mut self, literal: &'t StringLiteral) -> Result<()> {
        let Some(interpolated) = &literal.interpolations else {
            self.copy(literal.span.start, literal.span.end);
            return Ok(());
        };
        self.out.push(literal.quote);
        for part in &interpolated.parts {
            match part {
                StringPart::Text(span) => {
                    let from = interpolated.offsets[span.start];
                    let to = interpolated.offsets[span.end];
                    self.copy(from, to);
                }
                StringPart::Interpolation(element) => {
                    let printed = self.nested(&interpolated.text, &interpolated.offsets, |c| {
                        c.element(element)
                    })?;
                    let inner = printed
                        .strip_prefix("${")
                        .and_then(|rest| rest.strip_suffix('}'))
                        .unwrap_or(&printed);
                    self.out.push_str("${");
                    self.out.push_str(&strings::escape(inner, literal.quote));
                    self.out.push('}');
                }
            }
        }
        self.out.push(literal.quote);
        Ok(())
    }
}
