//! Builtin function registry.
//!
//! Name-keyed, case-insensitive dispatch to the interpreter-native
//! functions scripts can call from anywhere. Each area has its own
//! submodule; this module owns the name table and the dispatch match.
//!
//! Argument access (`arg0`..`arg9`, `args`), `este`, and `nulo` are
//! compiled straight to opcodes and never reach this registry.

mod convert;
mod math;
mod objects;
mod text;

use smallvec::SmallVec;
use strum::{Display, EnumString, FromRepr, IntoStaticStr};

use crate::{heap::ObjId, intern::StringId, value::Value, world::World};

/// What a builtin asks the VM to do next.
///
/// Most builtins produce a plain value. The `exec` family and `criar`
/// instead ask the VM to push a frame; the callee's return value lands
/// where the builtin result would have been (or is overridden, for
/// `criar`, with the freshly created object).
pub enum BuiltinOutcome {
    Value(Value),
    CallFunc {
        this: ObjId,
        name: StringId,
        args: SmallVec<[Value; 10]>,
        /// Resolve in this class's hierarchy instead of the receiver's
        /// (`execclasse`).
        class: Option<StringId>,
        /// When set, the frame's return value is replaced by this.
        result_override: Option<Value>,
    },
    /// `terminar` semantics requested from a builtin.
    Terminate,
}

impl From<Value> for BuiltinOutcome {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

/// Every builtin function, keyed by its script-visible lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[repr(u16)]
pub enum Builtin {
    // ===== conversions and literal predicates =====
    Real,
    Hex,
    Bin,
    Chr,
    Asc,
    Verdade,
    Falso,

    // ===== object operations =====
    Criar,
    Apagar,
    Ref,
    ObjAntes,
    ObjDepois,
    ObjPrim,
    ObjUlt,
    IntTotal,
    Classe,
    NomeClasse,
    Exec,
    ExecObj,
    ExecClasse,

    // ===== program meta =====
    #[strum(serialize = "_progfim")]
    ProgFim,
    #[strum(serialize = "_progexec")]
    ProgExec,
    #[strum(serialize = "_progerro")]
    ProgErro,

    // ===== output =====
    Escreva,
    EscrevaLn,

    // ===== variable exchange =====
    VarTroca,
    VarTrocaCod,

    // ===== text =====
    TxtTam,
    TxtMai,
    TxtMin,
    TxtMaiIni,
    TxtMaiCopia,
    TxtTrocaMai,
    TxtProcura,
    TxtProcuraDif,
    TxtProcuraMai,
    TxtProcuraLin,
    TxtProcuraPal,
    TxtTroca,
    TxtTrocaDif,
    TxtApara,
    TxtCopia,
    TxtPal,
    TxtLin,
    TxtPrim,
    TxtResto,
    TxtFim,
    TxtInv,
    TxtRepete,
    TxtEspacos,
    TxtRemove,
    TxtFiltro,
    TxtCod,
    TxtDec,
    TxtVisivel,
    TxtInvisivel,
    TxtUrlCod,
    TxtUrlDec,
    TxtSha1,
    TxtMd5,
    TxtSenha,
    TxtDist,
    TxtDistDif,
    TxtDistMai,
    TxtNome,
    TxtConverte,
    IntSenha,

    // ===== math =====
    IntAbs,
    IntSen,
    IntCos,
    IntTan,
    IntASen,
    IntACos,
    IntATan,
    IntATan2,
    IntSenH,
    IntCosH,
    IntTanH,
    IntLog,
    IntLog10,
    IntExp,
    IntRaiz,
    IntPot,
    IntCima,
    IntBaixo,
    IntArred,
    IntTrunc,
    IntGrau,
    IntRad,
    IntMax,
    IntMin,
    IntSinal,
    IntAleat,
}

impl Builtin {
    /// Bytecode operand form.
    #[must_use]
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Reconstructs a builtin from its bytecode operand.
    #[must_use]
    pub fn from_id(id: u16) -> Option<Self> {
        Self::from_repr(id)
    }

    /// Calls this builtin. `this` is the current receiver (used by the
    /// object family for defaults).
    pub(crate) fn call(self, world: &mut World, this: ObjId, args: &[Value]) -> BuiltinOutcome {
        match self {
            Self::Real | Self::Hex | Self::Bin | Self::Chr | Self::Asc | Self::Verdade | Self::Falso => {
                convert::call(self, args).into()
            }

            Self::Criar
            | Self::Apagar
            | Self::Ref
            | Self::ObjAntes
            | Self::ObjDepois
            | Self::ObjPrim
            | Self::ObjUlt
            | Self::IntTotal
            | Self::Classe
            | Self::NomeClasse
            | Self::Exec
            | Self::ExecObj
            | Self::ExecClasse => objects::call(self, world, this, args),

            Self::ProgFim => {
                if let Some(flag) = args.first() {
                    world.terminate = flag.truthy();
                }
                Value::Int(i64::from(world.terminate)).into()
            }
            Self::ProgExec => Value::Int(world.instructions_executed).into(),
            Self::ProgErro => Value::Int(world.last_error.as_i64()).into(),

            Self::Escreva | Self::EscrevaLn => {
                let mut out = String::new();
                for arg in args {
                    out.push_str(&arg.to_text());
                }
                if self == Self::EscrevaLn {
                    out.push('\n');
                }
                world.write_text(&out);
                BuiltinOutcome::Value(Value::Null)
            }

            Self::VarTroca => text::vartroca(args).into(),
            Self::VarTrocaCod => text::vartrocacod(args).into(),

            Self::TxtTam
            | Self::TxtMai
            | Self::TxtMin
            | Self::TxtMaiIni
            | Self::TxtMaiCopia
            | Self::TxtTrocaMai
            | Self::TxtProcura
            | Self::TxtProcuraDif
            | Self::TxtProcuraMai
            | Self::TxtProcuraLin
            | Self::TxtProcuraPal
            | Self::TxtTroca
            | Self::TxtTrocaDif
            | Self::TxtApara
            | Self::TxtCopia
            | Self::TxtPal
            | Self::TxtLin
            | Self::TxtPrim
            | Self::TxtResto
            | Self::TxtFim
            | Self::TxtInv
            | Self::TxtRepete
            | Self::TxtEspacos
            | Self::TxtRemove
            | Self::TxtFiltro
            | Self::TxtCod
            | Self::TxtDec
            | Self::TxtVisivel
            | Self::TxtInvisivel
            | Self::TxtUrlCod
            | Self::TxtUrlDec
            | Self::TxtSha1
            | Self::TxtMd5
            | Self::TxtSenha
            | Self::TxtDist
            | Self::TxtDistDif
            | Self::TxtDistMai
            | Self::TxtNome
            | Self::TxtConverte
            | Self::IntSenha => text::call(self, args).into(),

            Self::IntAbs
            | Self::IntSen
            | Self::IntCos
            | Self::IntTan
            | Self::IntASen
            | Self::IntACos
            | Self::IntATan
            | Self::IntATan2
            | Self::IntSenH
            | Self::IntCosH
            | Self::IntTanH
            | Self::IntLog
            | Self::IntLog10
            | Self::IntExp
            | Self::IntRaiz
            | Self::IntPot
            | Self::IntCima
            | Self::IntBaixo
            | Self::IntArred
            | Self::IntTrunc
            | Self::IntGrau
            | Self::IntRad
            | Self::IntMax
            | Self::IntMin
            | Self::IntSinal
            | Self::IntAleat => math::call(self, args).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_case_insensitively() {
        assert_eq!("ESCREVALN".parse::<Builtin>(), Ok(Builtin::EscrevaLn));
        assert_eq!("vartroca".parse::<Builtin>(), Ok(Builtin::VarTroca));
        assert_eq!("_progerro".parse::<Builtin>(), Ok(Builtin::ProgErro));
        assert!("inexistente".parse::<Builtin>().is_err());
    }

    #[test]
    fn ids_round_trip() {
        assert_eq!(Builtin::from_id(Builtin::TxtCod.id()), Some(Builtin::TxtCod));
        assert_eq!(Builtin::from_id(9999), None);
    }
}
