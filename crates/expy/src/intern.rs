//! Identifier interning.
//!
//! Names, attribute names and keyword-argument names are stored once in an
//! [`Interns`] table and referred to everywhere else by a [`StringId`]. The
//! table is filled by the parser and is read-only afterwards.
//!
//! StringIds are laid out as follows:
//! * 0 to count(StaticStrings) - the strings of [`StaticStrings`]
//! * 1000+ - strings interned while parsing

use std::str::FromStr;

use ahash::AHashMap;
use strum::{EnumString, FromRepr, IntoStaticStr};

/// Index into the string interner's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<StaticStrings> for StringId {
    fn from(value: StaticStrings) -> Self {
        Self(value as u32)
    }
}

const INTERN_STRING_ID_OFFSET: u32 = 1000;

/// Names the compiler itself refers to, available without a lookup.
#[repr(u16)]
#[derive(
    Debug, Clone, Copy, FromRepr, EnumString, IntoStaticStr, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum StaticStrings {
    #[strum(serialize = "")]
    EmptyString,
    #[strum(serialize = "<module>")]
    Module,
    #[strum(serialize = "<lambda>")]
    Lambda,
    #[strum(serialize = "<listcomp>")]
    ListComp,
    #[strum(serialize = "<setcomp>")]
    SetComp,
    #[strum(serialize = "<dictcomp>")]
    DictComp,
    #[strum(serialize = "<genexpr>")]
    GenExpr,
    #[strum(serialize = "<locals>")]
    Locals,
    #[strum(serialize = ".0")]
    ImplicitArg,
    #[strum(serialize = "__name__")]
    DunderName,
    #[strum(serialize = "__module__")]
    DunderModule,
    #[strum(serialize = "__qualname__")]
    DunderQualname,
    #[strum(serialize = "__doc__")]
    DunderDoc,
    #[strum(serialize = "__class__")]
    DunderClass,
    #[strum(serialize = "__classcell__")]
    DunderClassCell,
    #[strum(serialize = "__annotations__")]
    DunderAnnotations,
    #[strum(serialize = "__debug__")]
    DunderDebug,
    Super,
    Return,
    #[strum(serialize = "AssertionError")]
    AssertionError,
    #[strum(serialize = "StopAsyncIteration")]
    StopAsyncIteration,
}

/// The identifier table produced by the parser.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct Interns {
    string_map: AHashMap<String, StringId>,
    strings: Vec<String>,
}

impl Interns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, returning the existing id when it was seen before.
    pub fn intern(&mut self, name: &str) -> StringId {
        if let Ok(static_string) = StaticStrings::from_str(name) {
            return static_string.into();
        }
        if let Some(id) = self.string_map.get(name) {
            return *id;
        }
        let raw = u32::try_from(self.strings.len()).unwrap_or(u32::MAX - INTERN_STRING_ID_OFFSET);
        let id = StringId(raw + INTERN_STRING_ID_OFFSET);
        self.strings.push(name.to_owned());
        self.string_map.insert(name.to_owned(), id);
        id
    }

    /// Looks up a previously interned name without adding it.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<StringId> {
        if let Ok(static_string) = StaticStrings::from_str(name) {
            return Some(static_string.into());
        }
        self.string_map.get(name).copied()
    }

    /// Returns the text of `id`.
    ///
    /// Ids not issued by this table resolve to the empty string.
    #[must_use]
    pub fn get_str(&self, id: StringId) -> &str {
        if id.0 < INTERN_STRING_ID_OFFSET {
            return u16::try_from(id.0)
                .ok()
                .and_then(StaticStrings::from_repr)
                .map_or("", Into::into);
        }
        self.strings
            .get((id.0 - INTERN_STRING_ID_OFFSET) as usize)
            .map_or("", String::as_str)
    }

    /// Number of strings interned beyond the static table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
