//! AST → bytecode compiler.
//!
//! Works in two passes over the parsed classes: first a symbol pass that
//! records every class's variables, constants, functions, and bases (and
//! computes the hierarchy linearisation); then a lowering pass that
//! compiles every function, constant thunk, and initialiser.
//!
//! Identifier resolution order for a bare name: function local, argument
//! marker (handled in the parser), declared field or constant anywhere in
//! the hierarchy, builtin. An unresolved name compiles to the same dynamic
//! lookup on the current object that fields use — the distinction only
//! matters for shadowing builtins.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use super::{
    builder::CodeBuilder,
    code::{Code, Const},
    op::Opcode,
};
use crate::{
    builtins::Builtin,
    error::{CompileError, Diagnostics},
    intern::{Interns, StringId},
    parse::ast::{
        AssignOp, BinaryOp, ClassDecl, ConstDecl, DynName, Expr, NamePiece, Stmt, StmtKind,
        UnaryOp, VarDecl,
    },
    unit::{CompiledConstant, CompiledFunction, CompiledUnit, CompiledVariable, VarType},
};

/// Depth-first pre-order hierarchy walk with duplicate suppression
/// (first occurrence wins). The class itself always comes first.
#[must_use]
pub fn linearize(name: StringId, bases_of: &AHashMap<StringId, Vec<StringId>>) -> Vec<StringId> {
    let mut out = Vec::new();
    let mut seen = AHashSet::new();
    fn walk(
        name: StringId,
        bases_of: &AHashMap<StringId, Vec<StringId>>,
        seen: &mut AHashSet<StringId>,
        out: &mut Vec<StringId>,
    ) {
        if !seen.insert(name) {
            return;
        }
        out.push(name);
        if let Some(bases) = bases_of.get(&name) {
            for &base in bases {
                walk(base, bases_of, seen, out);
            }
        }
    }
    walk(name, bases_of, &mut seen, &mut out);
    out
}

/// Per-class symbol info collected before lowering.
struct Syms {
    vars: AHashMap<StringId, VarType>,
    consts: AHashSet<StringId>,
    funcs: AHashSet<StringId>,
}

/// Compiles all parsed classes into units. Compile errors exclude the
/// affected function (or whole class, for header problems) and are
/// collected in the returned diagnostics.
pub fn compile_program(
    classes: &[ClassDecl],
    interns: &mut Interns,
) -> (Vec<CompiledUnit>, Diagnostics) {
    let mut diags = Diagnostics::default();

    // ---- symbol pass ----
    let mut order = Vec::new();
    let mut syms: AHashMap<StringId, Syms> = AHashMap::new();
    let mut bases_of: AHashMap<StringId, Vec<StringId>> = AHashMap::new();
    let mut decl_by_id: AHashMap<StringId, &ClassDecl> = AHashMap::new();

    for decl in classes {
        let id = interns.name(&decl.name);
        if decl_by_id.contains_key(&id) {
            diags.compile_errors.push(CompileError {
                file: decl.file.clone(),
                line: decl.line,
                scope: decl.name.clone(),
                message: format!("class `{}` is defined more than once", decl.name),
            });
            continue;
        }
        decl_by_id.insert(id, decl);
        order.push(id);

        let mut info = Syms {
            vars: AHashMap::new(),
            consts: AHashSet::new(),
            funcs: AHashSet::new(),
        };
        for var in &decl.vars {
            match VarType::parse(&var.type_name) {
                Some(ty) => {
                    info.vars.insert(interns.name(&var.name), ty);
                }
                None => diags.compile_errors.push(CompileError {
                    file: decl.file.clone(),
                    line: var.line,
                    scope: decl.name.clone(),
                    message: format!("unknown variable type `{}`", var.type_name),
                }),
            }
        }
        for c in &decl.consts {
            info.consts.insert(interns.name(&c.name));
        }
        for f in &decl.funcs {
            info.funcs.insert(interns.name(&f.name));
        }
        syms.insert(id, info);
    }

    for (&id, decl) in &decl_by_id {
        let mut bases = Vec::new();
        for base in &decl.bases {
            let base_id = interns.name(base);
            if decl_by_id.contains_key(&base_id) {
                bases.push(base_id);
            } else {
                diags.compile_errors.push(CompileError {
                    file: decl.file.clone(),
                    line: decl.line,
                    scope: decl.name.clone(),
                    message: format!("unknown base class `{base}`"),
                });
            }
        }
        bases_of.insert(id, bases);
    }

    // ---- lowering pass ----
    let mut units = Vec::new();
    for id in order {
        let decl = decl_by_id[&id];
        let linear = linearize(id, &bases_of);
        let mut env = Env {
            interns: &mut *interns,
            syms: &syms,
            linear: &linear,
            file: &decl.file,
            class_name: &decl.name,
        };

        let mut vars = IndexMap::new();
        for var in &decl.vars {
            let Some(var_type) = VarType::parse(&var.type_name) else {
                continue; // already reported
            };
            let name = env.interns.name(&var.name);
            let init = match &var.init {
                Some(expr) => match compile_thunk(&mut env, &var.name, var.line, expr) {
                    Ok(code) => Some(code),
                    Err(e) => {
                        diags.compile_errors.push(e);
                        None
                    }
                },
                None => None,
            };
            vars.insert(
                name,
                CompiledVariable {
                    name,
                    type_name: Rc::from(var.type_name.as_str()),
                    var_type,
                    array: var.array,
                    common: var.common,
                    saved: var.saved,
                    init,
                    line: var.line,
                },
            );
        }

        let mut consts = IndexMap::new();
        for c in &decl.consts {
            let name = env.interns.name(&c.name);
            let compiled = match &c.expr {
                Expr::Int(v) => CompiledConstant::Int(*v),
                Expr::Double(v) => CompiledConstant::Double(*v),
                Expr::Str(s) => CompiledConstant::Str(Rc::from(s.as_str())),
                expr => match compile_thunk(&mut env, &c.name, c.line, expr) {
                    Ok(code) => CompiledConstant::Expr(code),
                    Err(e) => {
                        diags.compile_errors.push(e);
                        continue;
                    }
                },
            };
            consts.insert(name, compiled);
        }

        let mut funcs = IndexMap::new();
        for f in &decl.funcs {
            let name = env.interns.name(&f.name);
            match compile_func(&mut env, &f.name, f.line, &f.body) {
                Ok(code) => {
                    funcs.insert(
                        name,
                        CompiledFunction {
                            name,
                            code,
                            line: f.line,
                        },
                    );
                }
                Err(e) => diags.compile_errors.push(e),
            }
        }

        units.push(CompiledUnit {
            name: id,
            display_name: Rc::from(decl.name.as_str()),
            bases: bases_of[&id].clone(),
            linear,
            vars,
            consts,
            funcs,
            file: Rc::from(decl.file.as_str()),
            line: decl.line,
        });
    }

    (units, diags)
}

struct Env<'a> {
    interns: &'a mut Interns,
    syms: &'a AHashMap<StringId, Syms>,
    /// Linearisation of the class being compiled.
    linear: &'a [StringId],
    file: &'a str,
    class_name: &'a str,
}

impl Env<'_> {
    /// True when `name` is a declared variable or constant anywhere in the
    /// current hierarchy.
    fn is_declared(&self, name: StringId) -> bool {
        self.linear.iter().any(|cls| {
            self.syms
                .get(cls)
                .is_some_and(|s| s.vars.contains_key(&name) || s.consts.contains(&name))
        })
    }

    /// True when `name` is a function anywhere in the current hierarchy.
    fn is_func(&self, name: StringId) -> bool {
        self.linear
            .iter()
            .any(|cls| self.syms.get(cls).is_some_and(|s| s.funcs.contains(&name)))
    }
}

fn compile_thunk(
    env: &mut Env<'_>,
    scope: &str,
    line: u32,
    expr: &Expr,
) -> Result<Rc<Code>, CompileError> {
    let mut fc = FuncCompiler::new(env, scope, line);
    fc.b.set_line(line);
    fc.compile_expr(expr)?;
    fc.b.emit(Opcode::Ret);
    Ok(Rc::new(fc.finish()))
}

fn compile_func(
    env: &mut Env<'_>,
    func_name: &str,
    line: u32,
    body: &[Stmt],
) -> Result<Rc<Code>, CompileError> {
    let mut fc = FuncCompiler::new(env, func_name, line);
    fc.compile_stmts(body)?;
    fc.b.set_line(fc.last_line);
    fc.b.emit(Opcode::RetNull);
    Ok(Rc::new(fc.finish()))
}

struct LoopCtx {
    break_patches: Vec<usize>,
    continue_patches: Vec<usize>,
}

struct FuncCompiler<'e, 'a> {
    env: &'e mut Env<'a>,
    b: CodeBuilder,
    scope: String,
    locals: Vec<(StringId, Option<VarType>)>,
    loops: Vec<LoopCtx>,
    last_line: u32,
    temps: u8,
}

impl<'e, 'a> FuncCompiler<'e, 'a> {
    fn new(env: &'e mut Env<'a>, scope: &str, line: u32) -> Self {
        let scope = format!("{}.{}", env.class_name, scope);
        Self {
            env,
            b: CodeBuilder::new(),
            scope,
            locals: Vec::new(),
            loops: Vec::new(),
            last_line: line,
            temps: 0,
        }
    }

    fn finish(self) -> Code {
        let names = self.locals.iter().map(|(n, _)| *n).collect();
        let num = u8::try_from(self.locals.len()).unwrap_or(u8::MAX);
        self.b.build(num, names)
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError {
            file: self.env.file.to_string(),
            line: self.last_line,
            scope: self.scope.clone(),
            message: message.into(),
        }
    }

    fn local_slot(&self, name: StringId) -> Option<u8> {
        self.locals
            .iter()
            .position(|(n, _)| *n == name)
            .map(|i| u8::try_from(i).expect("slot count checked on declare"))
    }

    fn declare_local(&mut self, name: StringId, ty: Option<VarType>) -> Result<u8, CompileError> {
        if let Some(slot) = self.local_slot(name) {
            return Ok(slot); // redeclaration reuses the slot
        }
        if self.locals.len() >= 255 {
            return Err(self.error("too many locals in one function"));
        }
        let slot = u8::try_from(self.locals.len()).expect("checked above");
        self.locals.push((name, ty));
        Ok(slot)
    }

    fn alloc_temp(&mut self) -> Result<u8, CompileError> {
        let name = self.env.interns.exact(&format!("#tmp{}", self.temps));
        self.temps += 1;
        self.declare_local(name, None)
    }

    fn name_id(&mut self, text: &str) -> StringId {
        self.env.interns.name(text)
    }

    // =====================================================================
    // Statements
    // =====================================================================

    fn compile_stmts(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.last_line = stmt.line;
        self.b.set_line(stmt.line);
        match &stmt.kind {
            StmtKind::Expr(e) => self.compile_expr_stmt(e),
            StmtKind::Local(decls) => self.compile_locals(decls),
            StmtKind::If { arms } => self.compile_if(arms),
            StmtKind::While { cond, body } => self.compile_while(cond, body),
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => self.compile_for(init.as_ref(), cond.as_ref(), step.as_ref(), body),
            StmtKind::ForEach { var, seq, body } => self.compile_foreach(var, seq, body),
            StmtKind::Switch {
                value,
                arms,
                default,
            } => self.compile_switch(value, arms, default.as_deref()),
            StmtKind::Break { levels, cond } => self.compile_exit(true, *levels, cond.as_ref()),
            StmtKind::Continue { levels, cond } => self.compile_exit(false, *levels, cond.as_ref()),
            StmtKind::Return { cond, value } => {
                match (cond, value) {
                    (None, None) => self.b.emit(Opcode::RetNull),
                    (None, Some(v)) => {
                        self.compile_expr(v)?;
                        self.b.emit(Opcode::Ret);
                    }
                    (Some(c), value) => {
                        match value {
                            Some(v) => self.compile_expr(v)?,
                            None => self.b.emit(Opcode::LoadNull),
                        }
                        self.compile_expr(c)?;
                        self.b.emit(Opcode::RetCond);
                    }
                }
                Ok(())
            }
            StmtKind::Terminate => {
                self.b.emit(Opcode::Terminate);
                Ok(())
            }
        }
    }

    fn compile_expr_stmt(&mut self, e: &Expr) -> Result<(), CompileError> {
        match e {
            Expr::Assign { target, op, value } => self.compile_assign(target, *op, value, false),
            Expr::IncDec { target, dec, .. } => self.compile_incdec(target, *dec, false, false),
            _ => {
                self.compile_expr(e)?;
                self.b.emit(Opcode::Pop);
                Ok(())
            }
        }
    }

    fn compile_locals(&mut self, decls: &[VarDecl]) -> Result<(), CompileError> {
        for decl in decls {
            let Some(ty) = VarType::parse(&decl.type_name) else {
                return Err(self.error(format!("unknown variable type `{}`", decl.type_name)));
            };
            if matches!(ty, VarType::Handler(_)) {
                return Err(self.error("handler types can only be declared at class level"));
            }
            let name = self.name_id(&decl.name);
            let slot = self.declare_local(name, Some(ty))?;
            if decl.array > 0 {
                self.b.emit_u8(Opcode::BuildArray, 0);
            } else {
                match &decl.init {
                    Some(expr) => {
                        self.compile_expr(expr)?;
                        self.emit_coerce(ty);
                    }
                    None => match ty {
                        VarType::Real => {
                            self.b.emit(Opcode::LoadZero);
                            self.b.emit(Opcode::CoerceReal);
                        }
                        VarType::Txt { .. } => {
                            let idx = self.b.add_const(Const::Str(Rc::from("")));
                            self.b.emit_u16(Opcode::LoadConst, idx);
                        }
                        VarType::Ref => self.b.emit(Opcode::LoadNull),
                        _ => self.b.emit(Opcode::LoadZero),
                    },
                }
            }
            self.b.emit_u8(Opcode::StoreLocal, slot);
        }
        Ok(())
    }

    fn emit_coerce(&mut self, ty: VarType) {
        match ty {
            VarType::Int { bits } => self.b.emit_u8(Opcode::CoerceInt, bits),
            VarType::Real => self.b.emit(Opcode::CoerceReal),
            VarType::Txt { cap } => self
                .b
                .emit_u16(Opcode::CoerceTxt, u16::try_from(cap).unwrap_or(u16::MAX)),
            VarType::Ref | VarType::Handler(_) => {}
        }
    }

    fn compile_if(&mut self, arms: &[(Option<Expr>, Vec<Stmt>)]) -> Result<(), CompileError> {
        let mut end_patches = Vec::new();
        for (i, (cond, body)) in arms.iter().enumerate() {
            match cond {
                Some(cond) => {
                    self.compile_expr(cond)?;
                    let skip = self.b.emit_jump(Opcode::JumpIfFalse);
                    self.compile_stmts(body)?;
                    if i + 1 < arms.len() {
                        end_patches.push(self.b.emit_jump(Opcode::Jump));
                    }
                    self.b.patch_jump(skip);
                }
                None => {
                    self.compile_stmts(body)?;
                }
            }
        }
        for patch in end_patches {
            self.b.patch_jump(patch);
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<(), CompileError> {
        let start = self.b.offset();
        self.compile_expr(cond)?;
        let exit = self.b.emit_jump(Opcode::JumpIfFalse);
        self.loops.push(LoopCtx {
            break_patches: Vec::new(),
            continue_patches: Vec::new(),
        });
        self.compile_stmts(body)?;
        let ctx = self.loops.pop().expect("pushed above");
        for patch in ctx.continue_patches {
            self.b.patch_jump(patch);
        }
        self.b.emit_jump_back(Opcode::Jump, start);
        self.b.patch_jump(exit);
        for patch in ctx.break_patches {
            self.b.patch_jump(patch);
        }
        Ok(())
    }

    fn compile_for(
        &mut self,
        init: Option<&Expr>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<(), CompileError> {
        if let Some(init) = init {
            self.compile_expr_stmt(init)?;
        }
        let start = self.b.offset();
        let exit = match cond {
            Some(cond) => {
                self.compile_expr(cond)?;
                Some(self.b.emit_jump(Opcode::JumpIfFalse))
            }
            None => None,
        };
        self.loops.push(LoopCtx {
            break_patches: Vec::new(),
            continue_patches: Vec::new(),
        });
        self.compile_stmts(body)?;
        let ctx = self.loops.pop().expect("pushed above");
        for patch in ctx.continue_patches {
            self.b.patch_jump(patch);
        }
        if let Some(step) = step {
            self.compile_expr_stmt(step)?;
        }
        self.b.emit_jump_back(Opcode::Jump, start);
        if let Some(exit) = exit {
            self.b.patch_jump(exit);
        }
        for patch in ctx.break_patches {
            self.b.patch_jump(patch);
        }
        Ok(())
    }

    fn compile_foreach(&mut self, var: &str, seq: &Expr, body: &[Stmt]) -> Result<(), CompileError> {
        let var_id = self.name_id(var);
        let var_slot = self.declare_local(var_id, None)?;
        let seq_slot = self.alloc_temp()?;
        let idx_slot = self.alloc_temp()?;

        self.compile_expr(seq)?;
        self.b.emit_u8(Opcode::StoreLocal, seq_slot);
        self.b.emit(Opcode::LoadZero);
        self.b.emit_u8(Opcode::StoreLocal, idx_slot);

        let start = self.b.offset();
        self.b.emit_u8(Opcode::LoadLocal, idx_slot);
        self.b.emit_u8(Opcode::LoadLocal, seq_slot);
        self.b.emit(Opcode::SeqLen);
        self.b.emit(Opcode::Lt);
        let exit = self.b.emit_jump(Opcode::JumpIfFalse);

        self.b.emit_u8(Opcode::LoadLocal, seq_slot);
        self.b.emit_u8(Opcode::LoadLocal, idx_slot);
        self.b.emit(Opcode::IndexGet);
        self.b.emit_u8(Opcode::StoreLocal, var_slot);

        self.loops.push(LoopCtx {
            break_patches: Vec::new(),
            continue_patches: Vec::new(),
        });
        self.compile_stmts(body)?;
        let ctx = self.loops.pop().expect("pushed above");
        for patch in ctx.continue_patches {
            self.b.patch_jump(patch);
        }
        self.b.emit_u8(Opcode::LoadLocal, idx_slot);
        self.b.emit(Opcode::LoadOne);
        self.b.emit(Opcode::Add);
        self.b.emit_u8(Opcode::StoreLocal, idx_slot);
        self.b.emit_jump_back(Opcode::Jump, start);

        self.b.patch_jump(exit);
        for patch in ctx.break_patches {
            self.b.patch_jump(patch);
        }
        Ok(())
    }

    fn compile_switch(
        &mut self,
        value: &Expr,
        arms: &[crate::parse::ast::SwitchArm],
        default: Option<&[Stmt]>,
    ) -> Result<(), CompileError> {
        let tmp = self.alloc_temp()?;
        self.compile_expr(value)?;
        self.b.emit_u8(Opcode::StoreLocal, tmp);

        let mut end_patches = Vec::new();
        for arm in arms {
            let mut body_patches = Vec::new();
            for label in &arm.labels {
                self.b.emit_u8(Opcode::LoadLocal, tmp);
                self.compile_expr(label)?;
                self.b.emit(Opcode::Eq);
                body_patches.push(self.b.emit_jump(Opcode::JumpIfTrue));
            }
            let next_arm = self.b.emit_jump(Opcode::Jump);
            for patch in body_patches {
                self.b.patch_jump(patch);
            }
            self.compile_stmts(&arm.body)?;
            end_patches.push(self.b.emit_jump(Opcode::Jump));
            self.b.patch_jump(next_arm);
        }
        if let Some(default) = default {
            self.compile_stmts(default)?;
        }
        for patch in end_patches {
            self.b.patch_jump(patch);
        }
        Ok(())
    }

    fn compile_exit(
        &mut self,
        is_break: bool,
        levels: u8,
        cond: Option<&Expr>,
    ) -> Result<(), CompileError> {
        if usize::from(levels) > self.loops.len() {
            return Err(self.error(if is_break {
                "`sair` outside a loop (or deeper than the loop nesting)"
            } else {
                "`continuar` outside a loop (or deeper than the loop nesting)"
            }));
        }
        let skip = match cond {
            Some(cond) => {
                self.compile_expr(cond)?;
                Some(self.b.emit_jump(Opcode::JumpIfFalse))
            }
            None => None,
        };
        let patch = self.b.emit_jump(Opcode::Jump);
        let target = self.loops.len() - usize::from(levels);
        if is_break {
            self.loops[target].break_patches.push(patch);
        } else {
            self.loops[target].continue_patches.push(patch);
        }
        if let Some(skip) = skip {
            self.b.patch_jump(skip);
        }
        Ok(())
    }

    // =====================================================================
    // Expressions
    // =====================================================================

    fn compile_expr(&mut self, e: &Expr) -> Result<(), CompileError> {
        match e {
            Expr::Null => self.b.emit(Opcode::LoadNull),
            Expr::Int(0) => self.b.emit(Opcode::LoadZero),
            Expr::Int(1) => self.b.emit(Opcode::LoadOne),
            Expr::Int(v) => {
                let idx = self.b.add_const(Const::Int(*v));
                self.b.emit_u16(Opcode::LoadConst, idx);
            }
            Expr::Double(v) => {
                let idx = self.b.add_const(Const::Double(*v));
                self.b.emit_u16(Opcode::LoadConst, idx);
            }
            Expr::Str(s) => {
                let idx = self.b.add_const(Const::Str(Rc::from(s.as_str())));
                self.b.emit_u16(Opcode::LoadConst, idx);
            }
            Expr::This => self.b.emit(Opcode::LoadThis),
            Expr::Arg(n) => self.b.emit_u8(Opcode::LoadArg, *n),
            Expr::ArgCount => self.b.emit(Opcode::LoadArgCount),
            Expr::Ident(name) => self.compile_ident_load(name)?,
            Expr::IndexedRef(name) => {
                self.compile_name(name)?;
                self.b.emit(Opcode::LoadIndexed);
            }
            Expr::ClassMember { class, member } => {
                let member_id = self.static_member_id(member)?;
                match class.as_static() {
                    Some(text) => {
                        let class_id = self.name_id(text);
                        self.b.emit_u16_u16(
                            Opcode::LoadClassMember,
                            class_id.operand(),
                            member_id.operand(),
                        );
                    }
                    None => {
                        self.compile_name(class)?;
                        self.b
                            .emit_u16(Opcode::LoadClassMemberDyn, member_id.operand());
                    }
                }
            }
            Expr::Member {
                recv,
                name,
                countdown,
            } => {
                self.compile_expr(recv)?;
                let flags = u8::from(*countdown);
                match name.as_static() {
                    Some(text) => {
                        let id = self.env.interns.name(text);
                        self.b.emit_u16_u8(Opcode::LoadMember, id.operand(), flags);
                    }
                    None => {
                        self.compile_name(name)?;
                        self.b.emit_u8(Opcode::LoadMemberDyn, flags);
                    }
                }
            }
            Expr::Call { callee, args } => self.compile_call(callee, args)?,
            Expr::Index { recv, index } => {
                self.compile_expr(recv)?;
                self.compile_expr(index)?;
                self.b.emit(Opcode::IndexGet);
            }
            Expr::Array(items) => {
                if items.len() > 255 {
                    return Err(self.error("array literal exceeds 255 elements"));
                }
                for item in items {
                    self.compile_expr(item)?;
                }
                self.b
                    .emit_u8(Opcode::BuildArray, u8::try_from(items.len()).expect("checked"));
            }
            Expr::Unary { op, expr } => {
                self.compile_expr(expr)?;
                self.b.emit(match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::BitNot => Opcode::BitNot,
                });
            }
            Expr::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.b.emit(binary_opcode(*op));
            }
            Expr::And { lhs, rhs } => {
                self.compile_expr(lhs)?;
                let end = self.b.emit_jump(Opcode::JumpIfFalsePeek);
                self.b.emit(Opcode::Pop);
                self.compile_expr(rhs)?;
                self.b.patch_jump(end);
            }
            Expr::Or { lhs, rhs } => {
                self.compile_expr(lhs)?;
                let end = self.b.emit_jump(Opcode::JumpIfTruePeek);
                self.b.emit(Opcode::Pop);
                self.compile_expr(rhs)?;
                self.b.patch_jump(end);
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                self.compile_expr(cond)?;
                let no = self.b.emit_jump(Opcode::JumpIfFalse);
                self.compile_expr(then)?;
                let end = self.b.emit_jump(Opcode::Jump);
                self.b.patch_jump(no);
                self.compile_expr(otherwise)?;
                self.b.patch_jump(end);
            }
            Expr::Coalesce { lhs, rhs } => {
                self.compile_expr(lhs)?;
                let end = self.b.emit_jump(Opcode::JumpIfNotNullPeek);
                self.b.emit(Opcode::Pop);
                self.compile_expr(rhs)?;
                self.b.patch_jump(end);
            }
            Expr::Assign { target, op, value } => self.compile_assign(target, *op, value, true)?,
            Expr::IncDec { target, dec, post } => {
                self.compile_incdec(target, *dec, *post, true)?;
            }
        }
        Ok(())
    }

    fn static_member_id(&mut self, name: &DynName) -> Result<StringId, CompileError> {
        match name.as_static() {
            Some(text) => Ok(self.name_id(text)),
            None => Err(self.error("dynamic member names are not allowed after `Classe:`")),
        }
    }

    /// Compiles a `DynName` into a single name string on the stack.
    fn compile_name(&mut self, name: &DynName) -> Result<(), CompileError> {
        if let Some(text) = name.as_static() {
            let lowered = text.to_ascii_lowercase();
            let idx = self.b.add_const(Const::Str(Rc::from(lowered.as_str())));
            self.b.emit_u16(Opcode::LoadConst, idx);
            return Ok(());
        }
        let count = name.pieces.len();
        if count > 255 {
            return Err(self.error("dynamic name has too many pieces"));
        }
        for piece in &name.pieces {
            match piece {
                NamePiece::Text(t) => {
                    let lowered = t.to_ascii_lowercase();
                    let idx = self.b.add_const(Const::Str(Rc::from(lowered.as_str())));
                    self.b.emit_u16(Opcode::LoadConst, idx);
                }
                NamePiece::Expr(e) => self.compile_expr(e)?,
            }
        }
        self.b
            .emit_u8(Opcode::BuildName, u8::try_from(count).expect("checked"));
        Ok(())
    }

    fn compile_ident_load(&mut self, name: &DynName) -> Result<(), CompileError> {
        let Some(text) = name.as_static() else {
            // dynamic lookup on the current object
            self.b.emit(Opcode::LoadThis);
            self.compile_name(name)?;
            self.b.emit_u8(Opcode::LoadMemberDyn, 0);
            return Ok(());
        };
        let id = self.name_id(text);
        if let Some(slot) = self.local_slot(id) {
            self.b.emit_u8(Opcode::LoadLocal, slot);
            return Ok(());
        }
        if self.env.is_declared(id) {
            self.b.emit_u16(Opcode::LoadField, id.operand());
            return Ok(());
        }
        if let Ok(builtin) = text.parse::<Builtin>() {
            self.b.emit_u16_u8(Opcode::CallBuiltin, builtin.id(), 0);
            return Ok(());
        }
        // unresolved: dynamic lookup against the current object
        self.b.emit_u16(Opcode::LoadField, id.operand());
        Ok(())
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<(), CompileError> {
        if args.len() > 10 {
            return Err(self.error("calls take at most 10 arguments (arg0..arg9)"));
        }
        let argc = u8::try_from(args.len()).expect("checked");
        match callee {
            Expr::Ident(name) => match name.as_static() {
                Some(text) => {
                    let id = self.name_id(text);
                    if self.env.is_func(id) {
                        for arg in args {
                            self.compile_expr(arg)?;
                        }
                        self.b.emit_u16_u8(Opcode::CallVirtual, id.operand(), argc);
                    } else if let Ok(builtin) = text.parse::<Builtin>() {
                        for arg in args {
                            self.compile_expr(arg)?;
                        }
                        self.b.emit_u16_u8(Opcode::CallBuiltin, builtin.id(), argc);
                    } else {
                        for arg in args {
                            self.compile_expr(arg)?;
                        }
                        self.b.emit_u16_u8(Opcode::CallVirtual, id.operand(), argc);
                    }
                }
                None => {
                    self.b.emit(Opcode::LoadThis);
                    self.compile_name(name)?;
                    for arg in args {
                        self.compile_expr(arg)?;
                    }
                    self.b.emit_u8(Opcode::CallMemberDyn, argc);
                }
            },
            Expr::Member {
                recv,
                name,
                countdown,
            } => {
                self.compile_expr(recv)?;
                match name.as_static() {
                    Some(text) => {
                        let id = self.name_id(text);
                        for arg in args {
                            self.compile_expr(arg)?;
                        }
                        self.b.emit_u16_u8_u8(
                            Opcode::CallMember,
                            id.operand(),
                            argc,
                            u8::from(*countdown),
                        );
                    }
                    None => {
                        self.compile_name(name)?;
                        for arg in args {
                            self.compile_expr(arg)?;
                        }
                        self.b.emit_u8(Opcode::CallMemberDyn, argc);
                    }
                }
            }
            Expr::ClassMember { class, member } => {
                let member_id = self.static_member_id(member)?;
                match class.as_static() {
                    Some(text) => {
                        let class_id = self.name_id(text);
                        for arg in args {
                            self.compile_expr(arg)?;
                        }
                        self.b.emit_u16_u16_u8(
                            Opcode::CallClass,
                            class_id.operand(),
                            member_id.operand(),
                            argc,
                        );
                    }
                    None => {
                        self.compile_name(class)?;
                        for arg in args {
                            self.compile_expr(arg)?;
                        }
                        self.b
                            .emit_u16_u8(Opcode::CallClassDyn, member_id.operand(), argc);
                    }
                }
            }
            Expr::IndexedRef(name) => {
                // `$obj.func()` parses as Member; a direct `$obj(...)` is not callable
                let _ = name;
                return Err(self.error("an indexed object reference is not callable"));
            }
            _ => return Err(self.error("expression is not callable")),
        }
        Ok(())
    }

    // =====================================================================
    // Assignment lowering
    // =====================================================================

    fn compile_assign(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
        want_value: bool,
    ) -> Result<(), CompileError> {
        match target {
            Expr::Ident(name) => match name.as_static() {
                Some(text) => {
                    let id = self.name_id(text);
                    if let Some(slot) = self.local_slot(id) {
                        let ty = self.locals[usize::from(slot)].1;
                        if op != AssignOp::Set {
                            self.b.emit_u8(Opcode::LoadLocal, slot);
                        }
                        self.compile_expr(value)?;
                        if op != AssignOp::Set {
                            self.b.emit(assign_opcode(op));
                        }
                        if let Some(ty) = ty {
                            self.emit_coerce(ty);
                        }
                        if want_value {
                            self.b.emit(Opcode::Dup);
                        }
                        self.b.emit_u8(Opcode::StoreLocal, slot);
                    } else {
                        // field on the current object (declared or dynamic)
                        if op != AssignOp::Set {
                            self.b.emit_u16(Opcode::LoadField, id.operand());
                        }
                        self.compile_expr(value)?;
                        if op != AssignOp::Set {
                            self.b.emit(assign_opcode(op));
                        }
                        if want_value {
                            self.b.emit(Opcode::Dup);
                        }
                        self.b.emit_u16(Opcode::StoreField, id.operand());
                    }
                }
                None => {
                    // dynamic field name on the current object
                    let tmp_name = self.alloc_temp()?;
                    self.compile_name(name)?;
                    self.b.emit_u8(Opcode::StoreLocal, tmp_name);
                    if op != AssignOp::Set {
                        self.b.emit(Opcode::LoadThis);
                        self.b.emit_u8(Opcode::LoadLocal, tmp_name);
                        self.b.emit_u8(Opcode::LoadMemberDyn, 0);
                    }
                    self.compile_expr(value)?;
                    if op != AssignOp::Set {
                        self.b.emit(assign_opcode(op));
                    }
                    let tmp_v = self.alloc_temp()?;
                    self.b.emit_u8(Opcode::StoreLocal, tmp_v);
                    self.b.emit(Opcode::LoadThis);
                    self.b.emit_u8(Opcode::LoadLocal, tmp_name);
                    self.b.emit_u8(Opcode::LoadLocal, tmp_v);
                    self.b.emit(Opcode::StoreMemberDyn);
                    if want_value {
                        self.b.emit_u8(Opcode::LoadLocal, tmp_v);
                    }
                }
            },
            Expr::Member { recv, name, .. } => match name.as_static() {
                Some(text) => {
                    let id = self.name_id(text);
                    self.compile_expr(recv)?;
                    if op != AssignOp::Set {
                        self.b.emit(Opcode::Dup);
                        self.b.emit_u16_u8(Opcode::LoadMember, id.operand(), 0);
                    }
                    self.compile_expr(value)?;
                    if op != AssignOp::Set {
                        self.b.emit(assign_opcode(op));
                    }
                    if want_value {
                        let tmp = self.alloc_temp()?;
                        self.b.emit_u8(Opcode::StoreLocal, tmp);
                        self.b.emit_u8(Opcode::LoadLocal, tmp);
                        self.b.emit_u16(Opcode::StoreMember, id.operand());
                        self.b.emit_u8(Opcode::LoadLocal, tmp);
                    } else {
                        self.b.emit_u16(Opcode::StoreMember, id.operand());
                    }
                }
                None => {
                    let tmp_r = self.alloc_temp()?;
                    let tmp_n = self.alloc_temp()?;
                    self.compile_expr(recv)?;
                    self.b.emit_u8(Opcode::StoreLocal, tmp_r);
                    self.compile_name(name)?;
                    self.b.emit_u8(Opcode::StoreLocal, tmp_n);
                    if op != AssignOp::Set {
                        self.b.emit_u8(Opcode::LoadLocal, tmp_r);
                        self.b.emit_u8(Opcode::LoadLocal, tmp_n);
                        self.b.emit_u8(Opcode::LoadMemberDyn, 0);
                    }
                    self.compile_expr(value)?;
                    if op != AssignOp::Set {
                        self.b.emit(assign_opcode(op));
                    }
                    let tmp_v = self.alloc_temp()?;
                    self.b.emit_u8(Opcode::StoreLocal, tmp_v);
                    self.b.emit_u8(Opcode::LoadLocal, tmp_r);
                    self.b.emit_u8(Opcode::LoadLocal, tmp_n);
                    self.b.emit_u8(Opcode::LoadLocal, tmp_v);
                    self.b.emit(Opcode::StoreMemberDyn);
                    if want_value {
                        self.b.emit_u8(Opcode::LoadLocal, tmp_v);
                    }
                }
            },
            Expr::ClassMember { class, member } => {
                let member_id = self.static_member_id(member)?;
                match class.as_static() {
                    Some(text) => {
                        let class_id = self.name_id(text);
                        if op != AssignOp::Set {
                            self.b.emit_u16_u16(
                                Opcode::LoadClassMember,
                                class_id.operand(),
                                member_id.operand(),
                            );
                        }
                        self.compile_expr(value)?;
                        if op != AssignOp::Set {
                            self.b.emit(assign_opcode(op));
                        }
                        if want_value {
                            self.b.emit(Opcode::Dup);
                        }
                        self.b.emit_u16_u16(
                            Opcode::StoreClassMember,
                            class_id.operand(),
                            member_id.operand(),
                        );
                    }
                    None => {
                        let tmp_c = self.alloc_temp()?;
                        self.compile_name(class)?;
                        self.b.emit_u8(Opcode::StoreLocal, tmp_c);
                        if op != AssignOp::Set {
                            self.b.emit_u8(Opcode::LoadLocal, tmp_c);
                            self.b
                                .emit_u16(Opcode::LoadClassMemberDyn, member_id.operand());
                        }
                        self.compile_expr(value)?;
                        if op != AssignOp::Set {
                            self.b.emit(assign_opcode(op));
                        }
                        let tmp_v = self.alloc_temp()?;
                        self.b.emit_u8(Opcode::StoreLocal, tmp_v);
                        self.b.emit_u8(Opcode::LoadLocal, tmp_c);
                        self.b.emit_u8(Opcode::LoadLocal, tmp_v);
                        self.b
                            .emit_u16(Opcode::StoreClassMemberDyn, member_id.operand());
                        if want_value {
                            self.b.emit_u8(Opcode::LoadLocal, tmp_v);
                        }
                    }
                }
            }
            Expr::Index { recv, index } => {
                self.compile_index_assign(recv, index, op, value, want_value)?;
            }
            _ => return Err(self.error("expression is not assignable")),
        }
        Ok(())
    }

    /// `container[i] = v` — loads the container from its lvalue, updates
    /// the element, and stores the container back.
    fn compile_index_assign(
        &mut self,
        recv: &Expr,
        index: &Expr,
        op: AssignOp,
        value: &Expr,
        want_value: bool,
    ) -> Result<(), CompileError> {
        if matches!(recv, Expr::Index { .. }) {
            return Err(self.error("nested indexed assignment is not supported"));
        }
        let tmp_i = self.alloc_temp()?;
        let tmp_v = self.alloc_temp()?;

        self.compile_expr(index)?;
        self.b.emit_u8(Opcode::StoreLocal, tmp_i);

        if op != AssignOp::Set {
            self.compile_expr(recv)?;
            self.b.emit_u8(Opcode::LoadLocal, tmp_i);
            self.b.emit(Opcode::IndexGet);
        }
        self.compile_expr(value)?;
        if op != AssignOp::Set {
            self.b.emit(assign_opcode(op));
        }
        self.b.emit_u8(Opcode::StoreLocal, tmp_v);

        // container' = container with [i] = v
        self.compile_expr(recv)?;
        self.b.emit_u8(Opcode::LoadLocal, tmp_i);
        self.b.emit_u8(Opcode::LoadLocal, tmp_v);
        self.b.emit(Opcode::IndexStore);
        self.store_top_into(recv)?;

        if want_value {
            self.b.emit_u8(Opcode::LoadLocal, tmp_v);
        }
        Ok(())
    }

    /// Stores the value on top of the stack into a simple lvalue.
    fn store_top_into(&mut self, target: &Expr) -> Result<(), CompileError> {
        match target {
            Expr::Ident(name) => match name.as_static() {
                Some(text) => {
                    let id = self.name_id(text);
                    if let Some(slot) = self.local_slot(id) {
                        self.b.emit_u8(Opcode::StoreLocal, slot);
                    } else {
                        self.b.emit_u16(Opcode::StoreField, id.operand());
                    }
                }
                None => {
                    let tmp = self.alloc_temp()?;
                    self.b.emit_u8(Opcode::StoreLocal, tmp);
                    self.b.emit(Opcode::LoadThis);
                    self.compile_name(name)?;
                    self.b.emit_u8(Opcode::LoadLocal, tmp);
                    self.b.emit(Opcode::StoreMemberDyn);
                }
            },
            Expr::Member { recv, name, .. } => match name.as_static() {
                Some(text) => {
                    let id = self.name_id(text);
                    self.compile_expr(recv)?;
                    self.b.emit(Opcode::Swap);
                    self.b.emit_u16(Opcode::StoreMember, id.operand());
                }
                None => {
                    let tmp = self.alloc_temp()?;
                    self.b.emit_u8(Opcode::StoreLocal, tmp);
                    self.compile_expr(recv)?;
                    self.compile_name(name)?;
                    self.b.emit_u8(Opcode::LoadLocal, tmp);
                    self.b.emit(Opcode::StoreMemberDyn);
                }
            },
            Expr::ClassMember { class, member } => {
                let member_id = self.static_member_id(member)?;
                match class.as_static() {
                    Some(text) => {
                        let class_id = self.name_id(text);
                        self.b.emit_u16_u16(
                            Opcode::StoreClassMember,
                            class_id.operand(),
                            member_id.operand(),
                        );
                    }
                    None => {
                        let tmp = self.alloc_temp()?;
                        self.b.emit_u8(Opcode::StoreLocal, tmp);
                        self.compile_name(class)?;
                        self.b.emit_u8(Opcode::LoadLocal, tmp);
                        self.b
                            .emit_u16(Opcode::StoreClassMemberDyn, member_id.operand());
                    }
                }
            }
            _ => return Err(self.error("expression is not assignable")),
        }
        Ok(())
    }

    fn compile_incdec(
        &mut self,
        target: &Expr,
        dec: bool,
        post: bool,
        want_value: bool,
    ) -> Result<(), CompileError> {
        let op = if dec { AssignOp::Sub } else { AssignOp::Add };
        if post && want_value {
            // capture the old value first
            let tmp_old = self.alloc_temp()?;
            self.compile_expr(target)?;
            self.b.emit_u8(Opcode::StoreLocal, tmp_old);
            self.compile_assign(target, op, &Expr::Int(1), false)?;
            self.b.emit_u8(Opcode::LoadLocal, tmp_old);
            Ok(())
        } else {
            self.compile_assign(target, op, &Expr::Int(1), want_value)
        }
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Rem => Opcode::Rem,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::BitXor => Opcode::BitXor,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Ne => Opcode::Ne,
        BinaryOp::EqStrict => Opcode::EqStrict,
        BinaryOp::NeStrict => Opcode::NeStrict,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Ge,
    }
}

fn assign_opcode(op: AssignOp) -> Opcode {
    match op {
        AssignOp::Set => unreachable!("plain assignment has no operator"),
        AssignOp::Add => Opcode::Add,
        AssignOp::Sub => Opcode::Sub,
        AssignOp::Mul => Opcode::Mul,
        AssignOp::Div => Opcode::Div,
        AssignOp::Rem => Opcode::Rem,
        AssignOp::Shl => Opcode::Shl,
        AssignOp::Shr => Opcode::Shr,
        AssignOp::BitAnd => Opcode::BitAnd,
        AssignOp::BitOr => Opcode::BitOr,
        AssignOp::BitXor => Opcode::BitXor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_source;

    fn compile_one(src: &str) -> (Vec<CompiledUnit>, Interns, Diagnostics) {
        let classes = parse_source("test.int", src).expect("parse failure");
        let mut interns = Interns::new();
        let (units, diags) = compile_program(&classes, &mut interns);
        (units, interns, diags)
    }

    #[test]
    fn hello_world_bytecode_shape() {
        let (units, interns, diags) = compile_one(
            "classe main\nfunc inicializar\n  escrevaln(\"Olá, Mundo!\")\n  ret 1\n",
        );
        assert!(diags.is_clean(), "{diags:?}");
        let main = &units[0];
        let func = main.func(interns.get_name("inicializar").unwrap()).unwrap();
        func.code.assert_opcodes(&[
            Opcode::LoadConst,
            Opcode::CallBuiltin,
            Opcode::Pop,
            Opcode::LoadOne,
            Opcode::Ret,
            Opcode::RetNull,
        ]);
    }

    #[test]
    fn conditional_return_stack_order() {
        let (units, interns, diags) =
            compile_one("classe m\nfunc f\n  ret arg0, 7\n");
        assert!(diags.is_clean());
        let f = units[0].func(interns.get_name("f").unwrap()).unwrap();
        // value first, condition on top, then RetCond
        f.code.assert_opcodes(&[
            Opcode::LoadConst,
            Opcode::LoadArg,
            Opcode::RetCond,
            Opcode::RetNull,
        ]);
    }

    #[test]
    fn declared_field_compiles_to_field_access() {
        let (units, interns, diags) =
            compile_one("classe m\nint32 pontos\nfunc f\n  pontos = pontos + 1\n");
        assert!(diags.is_clean());
        let f = units[0].func(interns.get_name("f").unwrap()).unwrap();
        f.code.assert_opcodes(&[
            Opcode::LoadField,
            Opcode::LoadOne,
            Opcode::Add,
            Opcode::StoreField,
            Opcode::RetNull,
        ]);
    }

    #[test]
    fn local_declaration_shadows_field() {
        let (units, interns, diags) = compile_one(
            "classe m\nint32 x\nfunc f\n  int32 x = 2\n  x = 3\n",
        );
        assert!(diags.is_clean());
        let f = units[0].func(interns.get_name("f").unwrap()).unwrap();
        let ops: Vec<Opcode> = f.code.opcodes().into_iter().map(|(_, op)| op).collect();
        assert!(ops.contains(&Opcode::StoreLocal));
        assert!(!ops.contains(&Opcode::StoreField));
    }

    #[test]
    fn while_loop_jumps_backward() {
        let (units, interns, diags) =
            compile_one("classe m\nfunc f\n  enquanto arg0\n    arg0\n  efim\n");
        assert!(diags.is_clean());
        let f = units[0].func(interns.get_name("f").unwrap()).unwrap();
        let ops: Vec<Opcode> = f.code.opcodes().into_iter().map(|(_, op)| op).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::LoadArg,
                Opcode::JumpIfFalse,
                Opcode::LoadArg,
                Opcode::Pop,
                Opcode::Jump,
                Opcode::RetNull,
            ]
        );
    }

    #[test]
    fn linearisation_is_depth_first_with_dedup() {
        let (units, interns, diags) = compile_one(
            "classe a\nclasse b\nherda a\nclasse c\nherda a\nclasse d\nherda b, c\n",
        );
        assert!(diags.is_clean());
        let d = units.iter().find(|u| &*u.display_name == "d").unwrap();
        let names: Vec<&str> = d.linear.iter().map(|&id| interns.get(id)).collect();
        assert_eq!(names, vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn unknown_base_is_a_compile_error() {
        let (units, _, diags) = compile_one("classe m\nherda fantasma\n");
        assert_eq!(diags.compile_errors.len(), 1);
        assert_eq!(units.len(), 1);
        assert!(units[0].bases.is_empty());
    }

    #[test]
    fn expression_constants_become_thunks() {
        let (units, interns, diags) =
            compile_one("classe m\nconst dez = 10\nconst soma = arg0 + 1\n");
        assert!(diags.is_clean());
        let unit = &units[0];
        assert!(matches!(
            unit.constant(interns.get_name("dez").unwrap()),
            Some(CompiledConstant::Int(10))
        ));
        assert!(matches!(
            unit.constant(interns.get_name("soma").unwrap()),
            Some(CompiledConstant::Expr(_))
        ));
    }

    #[test]
    fn line_map_tracks_statements() {
        let (units, interns, diags) =
            compile_one("classe m\nfunc f\n  arg0\n  arg1\n");
        assert!(diags.is_clean());
        let f = units[0].func(interns.get_name("f").unwrap()).unwrap();
        assert_eq!(f.code.line_at(0), Some(3));
        // second statement starts after LoadArg(2 bytes) + Pop(1)
        assert_eq!(f.code.line_at(3), Some(4));
    }

    #[test]
    fn switch_compiles_to_sequential_tests() {
        let (units, interns, diags) = compile_one(
            "classe m\nfunc f\n  casovar arg0\n  caso 1\n    ret 10\n  padrao\n    ret 0\n  efim\n",
        );
        assert!(diags.is_clean());
        let f = units[0].func(interns.get_name("f").unwrap()).unwrap();
        let ops: Vec<Opcode> = f.code.opcodes().into_iter().map(|(_, op)| op).collect();
        assert!(ops.contains(&Opcode::Eq));
        assert!(ops.contains(&Opcode::JumpIfTrue));
    }
}
