//! Conversion of template elements: text, interpolations and directives.

use super::{
    find_outside_comments, has_comment, join_with_space, remove_outside_comments, ExprContext,
    SourceConverter,
};
use crate::error::Result;
use crate::legacy::ast::*;
use crate::legacy::lexer::skip_trivia;
use crate::naming;

const CLASSIC_COMPATIBLE: &str = "classicCompatible";

impl<'t, 'm> SourceConverter<'t, 'm> {
    pub(super) fn elements(&mut self, elements: &'t [Element]) -> Result<()> {
        elements.iter().try_for_each(|element| self.element(element))
    }

    pub(super) fn element(&mut self, element: &'t Element) -> Result<()> {
        match element {
            Element::Text(span) | Element::Comment(span) => {
                self.copy(span.start, span.end);
                Ok(())
            }
            Element::Header(header) => self.header(header),
            Element::Interpolation(interpolation) => self.interpolation(interpolation),
            Element::NumericalInterpolation(interpolation) => {
                self.numerical_interpolation(interpolation)
            }
            Element::LegacyComment(block) => self.legacy_comment(block),
            Element::NoParse(block) => {
                let pos = self.open_tag(&block.tag, "noParse");
                self.close_tag(&block.tag, pos, true);
                self.copy(block.content.start, block.content.end);
                self.end_tag(&block.end, "noParse");
                Ok(())
            }
            Element::If(block) => self.if_block(block),
            Element::Switch(block) => self.switch_block(block),
            Element::List(block) => self.list_block(block),
            Element::Items(block) => {
                let pos = self.open_tag(&block.tag, "items");
                let pos = block.loop_vars.last().map_or(pos, |var| {
                    self.copy(pos, var.span.end);
                    var.span.end
                });
                self.close_tag(&block.tag, pos, false);
                self.elements(&block.body)?;
                self.end_tag(&block.end, "items");
                Ok(())
            }
            Element::Sep(block) => {
                let pos = self.open_tag(&block.tag, "sep");
                self.close_tag(&block.tag, pos, true);
                self.elements(&block.body)?;
                if let Some(end) = &block.end {
                    self.end_tag(end, "sep");
                }
                Ok(())
            }
            Element::Break(tag) => {
                let pos = self.open_tag(tag, "break");
                self.close_tag(tag, pos, false);
                Ok(())
            }
            Element::Macro(def) => self.macro_def(def),
            Element::Nested(nested) => {
                let pos = self.open_tag(&nested.tag, "nested");
                let pos = self.arguments(pos, &nested.args)?;
                self.close_tag(&nested.tag, pos, false);
                Ok(())
            }
            Element::Return(ret) => {
                let mut pos = self.open_tag(&ret.tag, "return");
                if let Some(value) = &ret.value {
                    pos = self.gap_and_expr(pos, value)?;
                }
                self.close_tag(&ret.tag, pos, false);
                Ok(())
            }
            Element::Assign(assign) => self.assign(assign),
            Element::BlockAssign(assign) => {
                let mut pos = self.open_tag(&assign.tag, assign.scope.tag_name());
                self.copy(pos, assign.target.end);
                pos = assign.target.end;
                if let Some(namespace) = &assign.namespace {
                    pos = self.gap_and_expr(pos, namespace)?;
                }
                self.close_tag(&assign.tag, pos, true);
                self.elements(&assign.body)?;
                self.end_tag(&assign.end, assign.scope.tag_name());
                Ok(())
            }
            Element::Attempt(block) => {
                let pos = self.open_tag(&block.tag, "attempt");
                self.close_tag(&block.tag, pos, true);
                self.elements(&block.body)?;
                let pos = self.open_tag(&block.recover, "recover");
                self.close_tag(&block.recover, pos, true);
                self.elements(&block.recover_body)?;
                self.end_tag(&block.end, "attempt");
                Ok(())
            }
            Element::Block(block) => {
                let pos = self.open_tag(&block.tag, block.kind.fm3_name());
                self.close_tag(&block.tag, pos, true);
                self.elements(&block.body)?;
                self.end_tag(&block.end, block.kind.fm3_name());
                Ok(())
            }
            Element::Escape(block) => {
                let pos = self.open_tag(&block.tag, "escape");
                self.copy(pos, block.var.span.end);
                let pos = self.gap_and_expr(block.var.span.end, &block.expr)?;
                self.close_tag(&block.tag, pos, false);
                self.elements(&block.body)?;
                self.end_tag(&block.end, "escape");
                Ok(())
            }
            Element::OutputFormat(block) => {
                let pos = self.open_tag(&block.tag, "outputFormat");
                let pos = self.gap_and_expr(pos, &block.value)?;
                self.close_tag(&block.tag, pos, false);
                self.elements(&block.body)?;
                self.end_tag(&block.end, "outputFormat");
                Ok(())
            }
            Element::Simple(directive) => {
                let pos = self.open_tag(&directive.tag, directive.kind.name());
                self.close_tag(&directive.tag, pos, false);
                Ok(())
            }
            Element::Stop(stop) => {
                let mut pos = self.open_tag(&stop.tag, "stop");
                if let Some(message) = &stop.message {
                    pos = self.gap_and_expr(pos, message)?;
                }
                self.close_tag(&stop.tag, pos, false);
                Ok(())
            }
            Element::Import(import) => {
                let pos = self.open_tag(&import.tag, "import");
                let pos = self.gap_and_expr(pos, &import.path)?;
                self.copy(pos, import.namespace.span.end);
                self.close_tag(&import.tag, import.namespace.span.end, false);
                Ok(())
            }
            Element::Include(include) => self.include(include),
            Element::Setting(setting) => self.setting(setting),
            Element::Visit(visit) => {
                let name = if visit.recurse { "recurse" } else { "visit" };
                let mut pos = self.open_tag(&visit.tag, name);
                if let Some(node) = &visit.node {
                    pos = self.gap_and_expr(pos, node)?;
                }
                if let Some(namespace) = &visit.namespace {
                    pos = self.gap_and_expr(pos, namespace)?;
                }
                self.close_tag(&visit.tag, pos, false);
                Ok(())
            }
            Element::UserDirective(call) => self.user_directive(call),
            Element::LegacyCall(call) => self.legacy_call(call),
            Element::Transform(block) => self.transform(block),
        }
    }

    /// Copies the source from `pos` up to `expr`, then prints `expr`.
    pub(super) fn gap_and_expr(&mut self, pos: usize, expr: &'t Expr) -> Result<usize> {
        self.copy(pos, expr.start());
        self.expr(expr, ExprContext::Free)?;
        Ok(expr.end())
    }

    /// Prints positional arguments from `pos`, adding missing commas.
    fn arguments(&mut self, mut pos: usize, args: &'t [Expr]) -> Result<usize> {
        for (i, arg) in args.iter().enumerate() {
            if i == 0 {
                self.copy(pos, arg.start());
            } else {
                let gap = self.gap(pos, arg.start());
                self.separator_gap(gap);
            }
            self.expr(arg, ExprContext::Free)?;
            pos = arg.end();
        }
        Ok(pos)
    }

    /// Prints `name=value` arguments, keeping their source form apart from
    /// the values.
    fn named_arguments(&mut self, mut pos: usize, args: &'t [NamedArg]) -> Result<usize> {
        for arg in args {
            pos = self.gap_and_expr(pos, &arg.value)?;
        }
        Ok(pos)
    }

    fn header(&mut self, header: &'t Header) -> Result<()> {
        let tag = &header.tag;
        let mut pos = self.open_tag(tag, "ftl");
        for param in &header.params {
            self.copy(pos, param.name_span.start);
            let Some(name) = naming::header_param_candidate(&param.name) else {
                return Err(self.unconvertable(
                    format!(
                        "The \"{}\" header parameter has no FreeMarker 3 equivalent. \
                         You have to remove it manually before conversion.",
                        param.name
                    ),
                    param.name_span.start,
                ));
            };
            self.out.push_str(&name);
            pos = self.gap_and_expr(param.name_span.end, &param.value)?;
        }
        self.close_tag(tag, pos, false);
        Ok(())
    }

    fn interpolation(&mut self, interpolation: &'t Interpolation) -> Result<()> {
        let span = interpolation.span;
        let expr = &interpolation.expr;
        self.out.push_str("${");
        self.copy(span.start + 2, expr.start());
        self.expr(expr, ExprContext::Free)?;
        self.copy(expr.end(), span.end - 1);
        self.out.push('}');
        Ok(())
    }

    fn numerical_interpolation(&mut self, interpolation: &'t NumericalInterpolation) -> Result<()> {
        let span = interpolation.span;
        let expr = &interpolation.expr;
        self.out.push_str("${");
        self.copy(span.start + 2, expr.start());
        match interpolation.format {
            None => {
                self.expr(expr, ExprContext::Free)?;
                self.copy(expr.end(), span.end - 1);
            }
            Some(format) => {
                if expr.is_primary_like() {
                    self.expr(expr, ExprContext::BuiltInTarget)?;
                } else {
                    self.out.push('(');
                    self.expr(expr, ExprContext::Free)?;
                    self.out.push(')');
                }
                self.out.push_str("?string('");
                self.out.push_str(&number_format_pattern(format));
                self.out.push_str("')");
            }
        }
        self.out.push('}');
        Ok(())
    }

    fn legacy_comment(&mut self, block: &'t RawBlock) -> Result<()> {
        let content = block.content.text(self.src);
        if content.contains("-->") || content.contains("--]") {
            return Err(self.unconvertable(
                "You can't convert a #comment directive to a comment when its content \
                 contains \"-->\" or \"--]\".",
                block.tag.span.start,
            ));
        }
        self.out.push(self.syntax.begin_char());
        self.out.push_str("#--");
        self.out.push_str(content);
        self.out.push_str("--");
        self.out.push(self.syntax.end_char());
        Ok(())
    }

    fn if_block(&mut self, block: &'t IfBlock) -> Result<()> {
        for branch in &block.branches {
            let name = match branch.kind {
                IfKind::If => "if",
                IfKind::ElseIf => "elseIf",
                IfKind::Else => "else",
            };
            let mut pos = self.open_tag(&branch.tag, name);
            if let Some(condition) = &branch.condition {
                pos = self.gap_and_expr(pos, condition)?;
            }
            self.close_tag(&branch.tag, pos, true);
            self.elements(&branch.body)?;
        }
        self.end_tag(&block.end, "if");
        Ok(())
    }

    fn switch_block(&mut self, block: &'t SwitchBlock) -> Result<()> {
        let pos = self.open_tag(&block.tag, "switch");
        let pos = self.gap_and_expr(pos, &block.value)?;
        self.close_tag(&block.tag, pos, false);
        self.elements(&block.leading)?;

        let mut default_seen = false;
        for case in &block.cases {
            let pos = match &case.value {
                Some(value) => {
                    if default_seen {
                        return Err(self.unconvertable(
                            "The \"case\" directive can't be after the \"default\" directive \
                             since FreeMarker 3. You need to rearrange this \"switch\".",
                            case.tag.span.start,
                        ));
                    }
                    let pos = self.open_tag(&case.tag, "case");
                    self.gap_and_expr(pos, value)?
                }
                None => {
                    default_seen = true;
                    self.open_tag(&case.tag, "default")
                }
            };
            self.close_tag(&case.tag, pos, false);
            self.elements(&case.body)?;
        }
        self.end_tag(&block.end, "switch");
        Ok(())
    }

    fn list_block(&mut self, block: &'t ListBlock) -> Result<()> {
        let tag = &block.tag;
        match &block.form {
            ListForm::List { source, loop_vars } => {
                let pos = self.open_tag(tag, "list");
                let mut pos = self.gap_and_expr(pos, source)?;
                if let Some(last) = loop_vars.last() {
                    self.copy(pos, last.span.end);
                    pos = last.span.end;
                }
                self.close_tag(tag, pos, true);
            }
            ListForm::Foreach { var, source } => {
                // `foreach x in xs` becomes `list xs as x`
                let pos = self.open_tag(tag, "list");
                self.copy(pos, var.span.start);
                self.expr(source, ExprContext::Free)?;
                let after_source = self.gap(source.end(), tag.close.start);
                self.out.push_str(after_source.trim_end());
                self.out.push_str(" as ");
                self.out.push_str(var.span.text(self.src));
                let in_start = skip_trivia(self.src, var.span.end).unwrap_or(var.span.end);
                self.out.push_str(self.gap(var.span.end, in_start).trim_end());
                self.out.push_str(self.gap(in_start + 2, source.start()).trim_end());
                self.close_tag(tag, tag.close.start, true);
            }
        }
        self.elements(&block.body)?;
        if let Some(else_branch) = &block.else_branch {
            let pos = self.open_tag(&else_branch.tag, "else");
            self.close_tag(&else_branch.tag, pos, true);
            self.elements(&else_branch.body)?;
        }
        self.end_tag(&block.end, "list");
        Ok(())
    }

    fn macro_def(&mut self, def: &'t MacroDef) -> Result<()> {
        let tag = &def.tag;
        let directive = if def.function { "function" } else { "macro" };
        let pos = self.open_tag(tag, directive);
        self.copy(pos, def.name_span.end);

        let mut items = Vec::with_capacity(def.params.len() + 1);
        for param in &def.params {
            let mut printed = param.name.span.text(self.src).to_string();
            let mut end = param.name.span.end;
            if let Some(default) = &param.default {
                printed.push_str(self.gap(end, default.start()));
                printed.push_str(&self.expression_text(default)?);
                end = default.end();
            }
            items.push((param.name.span.start, printed, end));
        }
        if let Some((name, dots_end)) = &def.catch_all {
            let printed = self.gap(name.span.start, *dots_end).to_string();
            items.push((name.span.start, printed, *dots_end));
        }

        let params = if def.function {
            self.function_params(def, &items)
        } else {
            self.macro_params(def, &items)
        };
        self.out.push_str(&params);
        self.close_tag(tag, tag.close.start, true);

        self.elements(&def.body)?;
        self.end_tag(&def.end, directive);
        Ok(())
    }

    /// FreeMarker 3 macros take their parameters without parentheses and
    /// commas.
    fn macro_params(&self, def: &MacroDef, items: &[(usize, String, usize)]) -> String {
        let mut out = String::new();
        let mut pos = def.name_span.end;
        let mut pending_join = false;
        if let Some(open) = def.open_paren {
            out.push_str(self.gap(pos, open.start));
            pos = open.end;
            pending_join = true;
        }
        for (start, printed, end) in items {
            let mut gap = self.gap(pos, *start);
            if let Some(comma) = find_outside_comments(gap, ',') {
                out.push_str(&gap[..comma]);
                gap = &gap[comma + 1..];
                pending_join = true;
            }
            let piece = format!("{gap}{printed}");
            if pending_join {
                out = join_with_space(&out, &piece);
            } else {
                out.push_str(&piece);
            }
            pending_join = false;
            pos = *end;
        }
        if let Some(close) = def.close_paren {
            let before_close = self.gap(pos, close.start).trim_end();
            if pending_join {
                out = join_with_space(&out, before_close);
            } else {
                out.push_str(before_close);
            }
            pos = close.end;
        }
        out.push_str(self.gap(pos, def.tag.close.start));
        if def.open_paren.is_some() && out.trim().is_empty() {
            out.clear();
        }
        out
    }

    /// FreeMarker 3 functions always have a parenthesized, comma separated
    /// parameter list.
    fn function_params(&self, def: &MacroDef, items: &[(usize, String, usize)]) -> String {
        let mut out = String::new();
        let mut pos = def.name_span.end;
        if let Some(open) = def.open_paren {
            out.push_str(self.gap(pos, open.end));
            pos = open.end;
        } else {
            out.push('(');
        }
        for (i, (start, printed, end)) in items.iter().enumerate() {
            let gap = self.gap(pos, *start);
            if i == 0 {
                if def.open_paren.is_some() || has_comment(gap) {
                    out.push_str(if def.open_paren.is_some() { gap } else { gap.trim_start() });
                }
            } else if find_outside_comments(gap, ',').is_some() {
                out.push_str(gap);
            } else {
                let rest = gap.trim_start();
                if gap[..gap.len() - rest.len()].contains('\n') {
                    out.push(',');
                    out.push_str(gap);
                } else {
                    out.push_str(", ");
                    out.push_str(rest);
                }
            }
            out.push_str(printed);
            pos = *end;
        }
        match def.close_paren {
            Some(close) => {
                out.push_str(self.gap(pos, close.end));
                out.push_str(self.gap(close.end, def.tag.close.start));
            }
            None => {
                out.push(')');
                out.push_str(self.gap(pos, def.tag.close.start));
            }
        }
        out
    }

    fn assign(&mut self, assign: &'t AssignDirective) -> Result<()> {
        let mut pos = self.open_tag(&assign.tag, assign.scope.tag_name());
        for assignment in &assign.assignments {
            self.copy(pos, assignment.op.end);
            pos = assignment.op.end;
            if let Some(value) = &assignment.value {
                pos = self.gap_and_expr(pos, value)?;
            }
        }
        if let Some(namespace) = &assign.namespace {
            pos = self.gap_and_expr(pos, namespace)?;
        }
        self.close_tag(&assign.tag, pos, false);
        Ok(())
    }

    fn include(&mut self, include: &'t IncludeDirective) -> Result<()> {
        let tag = &include.tag;
        let pos = self.open_tag(tag, "include");
        let path_end = self.gap_and_expr(pos, &include.path)?;

        for param in &include.params {
            let removed = match param.kind {
                IncludeParamKind::Parse => Some(
                    "The \"parse\" parameter of #include was removed, as it's not supported \
                     anymore. Use the templateConfigurations configuration setting to specify \
                     which files are not parsed.",
                ),
                IncludeParamKind::Encoding => Some(
                    "The \"encoding\" parameter of #include was removed, as it's not supported \
                     anymore. Use the templateConfigurations configuration setting to specify \
                     which files has a different encoding than the configured default.",
                ),
                IncludeParamKind::IgnoreMissing => None,
            };
            if let Some(message) = removed {
                self.warn_in_source(param.arg.value.start(), message)?;
            }
        }

        let ignore_missing = include
            .params
            .iter()
            .position(|param| param.kind == IncludeParamKind::IgnoreMissing);
        let anything_removed = include.params.len() > usize::from(ignore_missing.is_some());
        let first_param_start = include
            .params
            .first()
            .map_or(tag.close.start, |param| param.arg.name_span.start);
        let gap_after_path = self.gap(path_end, first_param_start);
        if ignore_missing.is_some() || !anything_removed {
            self.out.push_str(gap_after_path);
        } else if has_comment(gap_after_path) {
            self.out.push_str(gap_after_path.trim_end());
        }

        if let Some(index) = ignore_missing {
            let arg = &include.params[index].arg;
            self.out.push_str("ignoreMissing");
            self.copy(arg.name_span.end, arg.value.start());
            self.expr(&arg.value, ExprContext::Free)?;
            let next_start = include
                .params
                .get(index + 1)
                .map_or(tag.close.start, |param| param.arg.name_span.start);
            let gap_after = self.gap(arg.value.end(), next_start);
            if index + 1 == include.params.len() {
                self.out.push_str(gap_after);
            } else if has_comment(gap_after) {
                self.out.push_str(gap_after.trim_end());
            }
        }

        if tag.is_empty() {
            self.out.push('/');
        }
        self.out.push(self.syntax.end_char());
        Ok(())
    }

    fn setting(&mut self, setting: &'t SettingDirective) -> Result<()> {
        let tag = &setting.tag;
        let name = &setting.name;
        let candidate = naming::setting_candidate(&name.name);
        if candidate == CLASSIC_COMPATIBLE {
            return Err(self.unconvertable(
                format!(
                    "The \"{CLASSIC_COMPATIBLE}\" setting doesn't exist in FreeMarker 3. \
                     You have to remove it manually before conversion."
                ),
                tag.span.start,
            ));
        }
        if !naming::is_fm3_setting(&candidate) {
            return Err(self.failed_at(
                format!(
                    "Couldn't map \"{}\" to a valid FreeMarker 3 setting name (tried: {candidate})",
                    name.name
                ),
                name.span.start,
            ));
        }
        let pos = self.open_tag(tag, "setting");
        self.copy(pos, name.span.start);
        self.out.push_str(&candidate);
        let pos = self.gap_and_expr(name.span.end, &setting.value)?;
        self.close_tag(tag, pos, false);
        Ok(())
    }

    fn user_directive(&mut self, call: &'t UserDirective) -> Result<()> {
        self.out.push(self.syntax.begin_char());
        self.out.push('@');
        let pos = self.gap_and_expr(call.start + 2, &call.callee)?;
        let mut pos = self.arguments(pos, &call.positional)?;
        pos = self.named_arguments(pos, &call.named)?;
        if let Some(last) = call.loop_vars.last() {
            self.copy(pos, last.span.end);
            pos = last.span.end;
        }
        self.copy(pos, call.close.start);
        if call.close.len() == 2 {
            self.out.push('/');
        }
        self.out.push(self.syntax.end_char());

        if let Some((body, end)) = &call.body {
            self.elements(body)?;
            self.out.push(self.syntax.begin_char());
            self.out.push_str("/@");
            self.copy(end.name_start, end.close.start);
            self.out.push(self.syntax.end_char());
        }
        Ok(())
    }

    /// `<#call m(1, 2)>` becomes `<@m 1, 2/>`.
    fn legacy_call(&mut self, call: &'t LegacyCall) -> Result<()> {
        let tag = &call.tag;
        self.out.push(self.syntax.begin_char());
        self.out.push('@');
        self.expr(&call.callee, ExprContext::Free)?;
        let mut pos = call.callee.end();

        match call.parens {
            Some((open, close)) => {
                self.copy(pos, open.start);
                pos = open.end;
                if let Some(first) = call.positional.first() {
                    let gap = self.gap(pos, first.start());
                    if !self.out.ends_with(char::is_whitespace)
                        && !gap.starts_with(char::is_whitespace)
                    {
                        self.out.push(' ');
                    }
                }
                pos = self.arguments(pos, &call.positional)?;
                self.out.push_str(self.gap(pos, close.start).trim_end());
                pos = close.end;
            }
            None => {
                pos = self.arguments(pos, &call.positional)?;
                pos = self.named_arguments(pos, &call.named)?;
            }
        }
        self.copy(pos, tag.close.start);
        self.out.push('/');
        self.out.push(self.syntax.end_char());
        Ok(())
    }

    /// `<#transform t>...</#transform>` becomes `<@t>...</@t>`.
    fn transform(&mut self, block: &'t TransformBlock) -> Result<()> {
        let tag = &block.tag;
        self.out.push(self.syntax.begin_char());
        self.out.push('@');
        self.expr(&block.callee, ExprContext::Free)?;
        // The optional `;` after the callee would start loop variables in a call
        let params_start = block
            .params
            .first()
            .map_or(tag.close.start, |param| param.name_span.start);
        let gap = self.gap(block.callee.end(), params_start);
        self.out.push_str(&remove_outside_comments(gap, ';'));
        let pos = self.named_arguments(params_start, &block.params)?;
        self.copy(pos, tag.close.start);
        self.out.push(self.syntax.end_char());

        self.elements(&block.body)?;
        self.out.push(self.syntax.begin_char());
        self.out.push_str("/@");
        if block.callee.is_identifier_path() {
            self.out.push_str(block.callee.span().text(self.src));
        }
        self.out.push(self.syntax.end_char());
        Ok(())
    }
}

/// `?string` pattern for a `#{...; mXMY}` format. A missing maximum equals
/// the minimum; a missing minimum is 0.
fn number_format_pattern(format: NumberFormat) -> String {
    let min = format.min.unwrap_or(0) as usize;
    let max = (format.max.unwrap_or(min as u32) as usize).max(min);
    let mut pattern = String::from("0");
    if max > 0 {
        pattern.push('.');
        pattern.push_str(&"0".repeat(min));
        pattern.push_str(&"#".repeat(max - min));
    }
    pattern
}
