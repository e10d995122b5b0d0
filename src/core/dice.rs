//! Dice expressions, result lists and range tables.
//!
//! Supports `NdS`, `dS`, fudge dice `NdF` and sums of them with integer
//! constants: `2d6+1d4-2`. Tables map inclusive ranges to outcomes:
//! `1..3 -> common; 4..6 -> rare`.

use serde::Serialize;
use std::fmt;
use std::ops::{Add, Div, Mul, RangeInclusive, Sub};
use std::str::FromStr;
use thiserror::Error;

use crate::core::random::RandomSource;

/// Upper bound on the number of dice in one expression, across all terms.
const MAX_DICE: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("malformed dice expression '{input}': {reason}")]
    Malformed { input: String, reason: String },
    #[error("roll of {roll} falls outside every table range")]
    OutOfRangeRoll { roll: i64 },
}

fn malformed(input: &str, reason: impl Into<String>) -> DiceError {
    DiceError::Malformed {
        input: input.to_string(),
        reason: reason.into(),
    }
}

/// Faces on each die.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sides {
    /// A numbered die, rolling `1..=n`.
    Faces(u32),
    /// A fudge die, rolling one of -1, 0, 1.
    Fudge,
}

impl Sides {
    fn face_range(self) -> (i64, i64) {
        match self {
            Sides::Faces(n) => (1, i64::from(n)),
            Sides::Fudge => (-1, 1),
        }
    }
}

/// One `NdS` group inside an expression, added to or subtracted from the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiceTerm {
    count: u32,
    sides: Sides,
    negative: bool,
}

impl DiceTerm {
    pub fn new(count: u32, sides: Sides) -> Self {
        Self {
            count,
            sides,
            negative: false,
        }
    }

    /// The same dice, subtracted instead of added.
    pub fn negated(self) -> Self {
        Self {
            negative: !self.negative,
            ..self
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn sides(&self) -> Sides {
        self.sides
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Lowest and highest signed contribution of this term.
    fn bounds(&self) -> (i64, i64) {
        let (low, high) = self.sides.face_range();
        let n = i64::from(self.count);
        if self.negative {
            (-high * n, -low * n)
        } else {
            (low * n, high * n)
        }
    }
}

impl fmt::Display for DiceTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sides {
            Sides::Faces(n) => write!(f, "{}d{}", self.count, n),
            Sides::Fudge => write!(f, "{}dF", self.count),
        }
    }
}

/// A compiled dice expression like `3d6+2` or `2d6+1d4-1`.
///
/// The possible totals are computed once at construction, so an expression
/// that exists can always be rolled without overflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiceExpr {
    terms: Vec<DiceTerm>,
    modifier: i64,
    min_total: i64,
    max_total: i64,
}

impl DiceExpr {
    /// A single group of dice plus a constant.
    pub fn new(count: u32, sides: Sides, modifier: i64) -> Result<Self, DiceError> {
        Self::from_terms(vec![DiceTerm::new(count, sides)], modifier)
    }

    /// A sum of dice groups plus a constant.
    pub fn from_terms(terms: Vec<DiceTerm>, modifier: i64) -> Result<Self, DiceError> {
        let mut expr = Self {
            terms,
            modifier,
            min_total: 0,
            max_total: 0,
        };
        if expr.terms.is_empty() {
            return Err(malformed(&expr.to_string(), "at least one die is required"));
        }

        let mut dice: u32 = 0;
        for term in &expr.terms {
            if term.count == 0 {
                return Err(malformed(&expr.to_string(), "every term needs at least one die"));
            }
            if term.sides == Sides::Faces(0) {
                return Err(malformed(&expr.to_string(), "a die needs at least one side"));
            }
            dice = dice.saturating_add(term.count);
        }
        if dice > MAX_DICE {
            return Err(malformed(
                &expr.to_string(),
                format!("dice count must be between 1 and {}", MAX_DICE),
            ));
        }

        // Dice alone stay far inside i64; only the constant can push a total out.
        let (low, high) = expr
            .terms
            .iter()
            .map(DiceTerm::bounds)
            .fold((0i64, 0i64), |(lo, hi), (l, h)| (lo + l, hi + h));
        match (low.checked_add(modifier), high.checked_add(modifier)) {
            (Some(min_total), Some(max_total)) => {
                expr.min_total = min_total;
                expr.max_total = max_total;
                Ok(expr)
            }
            _ => Err(malformed(&expr.to_string(), "total out of range")),
        }
    }

    /// Parse a dice expression once into an immutable structure.
    pub fn compile(input: &str) -> Result<Self, DiceError> {
        let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(malformed(input, "empty expression"));
        }

        let mut terms = Vec::new();
        let mut modifier: i64 = 0;
        let mut negative = false;
        let mut rest = compact.as_str();
        loop {
            let end = rest.find(['+', '-']).unwrap_or(rest.len());
            let token = &rest[..end];
            if token.is_empty() {
                return Err(malformed(input, "expected a term around '+' or '-'"));
            }

            if let Some(d_pos) = token.find(['d', 'D']) {
                let term = parse_term(input, token, d_pos)?;
                terms.push(if negative { term.negated() } else { term });
            } else if token.chars().all(|c| c.is_ascii_digit()) {
                let magnitude: i64 = token
                    .parse()
                    .map_err(|_| malformed(input, "modifier is too large"))?;
                let signed = if negative { -magnitude } else { magnitude };
                modifier = modifier
                    .checked_add(signed)
                    .ok_or_else(|| malformed(input, "modifier is too large"))?;
            } else {
                return Err(malformed(
                    input,
                    format!("term '{}' is neither dice nor an integer", token),
                ));
            }

            if end == rest.len() {
                break;
            }
            negative = rest.as_bytes()[end] == b'-';
            rest = &rest[end + 1..];
        }

        if terms.is_empty() {
            return Err(malformed(input, "missing 'd' separator"));
        }

        Self::from_terms(terms, modifier).map_err(|e| match e {
            DiceError::Malformed { reason, .. } => malformed(input, reason),
            other => other,
        })
    }

    pub fn terms(&self) -> &[DiceTerm] {
        &self.terms
    }

    /// Number of dice rolled, across every term.
    pub fn count(&self) -> u32 {
        self.terms.iter().map(|t| t.count).sum()
    }

    /// Sides of the first term.
    pub fn sides(&self) -> Sides {
        self.terms[0].sides
    }

    pub fn modifier(&self) -> i64 {
        self.modifier
    }

    /// Lowest possible total.
    pub fn min_total(&self) -> i64 {
        self.min_total
    }

    /// Highest possible total.
    pub fn max_total(&self) -> i64 {
        self.max_total
    }

    /// Roll every die once and sum the draws with their term's sign, plus the modifier.
    pub fn roll(&self, rng: &mut dyn RandomSource) -> ResultList {
        let mut rolls = Vec::with_capacity(self.count() as usize);
        let mut sum = 0i64;
        for term in &self.terms {
            let (low, high) = term.sides.face_range();
            for _ in 0..term.count {
                let draw = rng.int_in_range(low, high);
                rolls.push(draw);
                sum += if term.negative { -draw } else { draw };
            }
        }
        ResultList {
            rolls,
            total: sum + self.modifier,
        }
    }
}

fn parse_term(input: &str, token: &str, d_pos: usize) -> Result<DiceTerm, DiceError> {
    let count_str = &token[..d_pos];
    let count: u32 = if count_str.is_empty() {
        1
    } else if count_str.chars().all(|c| c.is_ascii_digit()) {
        count_str
            .parse()
            .map_err(|_| malformed(input, format!("dice count '{}' is too large", count_str)))?
    } else {
        return Err(malformed(
            input,
            format!("dice count '{}' is not a positive integer", count_str),
        ));
    };

    let sides = match &token[d_pos + 1..] {
        "f" | "F" => Sides::Fudge,
        s if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => {
            let faces: u32 = s
                .parse()
                .map_err(|_| malformed(input, format!("die size '{}' is too large", s)))?;
            Sides::Faces(faces)
        }
        s => {
            return Err(malformed(
                input,
                format!("die size '{}' is neither a positive integer nor 'F'", s),
            ))
        }
    };
    Ok(DiceTerm::new(count, sides))
}

impl FromStr for DiceExpr {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for DiceExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            match (i, term.negative) {
                (_, true) => write!(f, "-")?,
                (0, false) => {}
                (_, false) => write!(f, "+")?,
            }
            write!(f, "{}", term)?;
        }
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{}", m),
            m => write!(f, "{}", m),
        }
    }
}

/// The individual draws of one roll, tagged with the final total.
///
/// Arithmetic with a scalar or another result list works on the total and
/// yields a plain number: `roll + 2`, `roll * other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultList {
    rolls: Vec<i64>,
    total: i64,
}

impl ResultList {
    /// A result list whose total is the plain sum of the draws.
    pub fn from_rolls(rolls: Vec<i64>) -> Self {
        let total = rolls.iter().sum();
        Self { rolls, total }
    }

    /// Draws before the modifier was applied.
    pub fn rolls(&self) -> &[i64] {
        &self.rolls
    }

    /// Sum of the draws plus the expression's modifier.
    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.rolls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rolls.is_empty()
    }
}

impl fmt::Display for ResultList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.total)
    }
}

impl PartialEq<i64> for ResultList {
    fn eq(&self, other: &i64) -> bool {
        self.total == *other
    }
}

impl From<&ResultList> for i64 {
    fn from(list: &ResultList) -> i64 {
        list.total
    }
}

macro_rules! sum_arithmetic {
    ($($trait:ident :: $method:ident => $out:ty),* $(,)?) => {$(
        impl $trait<i64> for ResultList {
            type Output = $out;
            fn $method(self, rhs: i64) -> $out {
                <$out>::from(self.total).$method(<$out>::from(rhs))
            }
        }

        impl $trait<ResultList> for i64 {
            type Output = $out;
            fn $method(self, rhs: ResultList) -> $out {
                <$out>::from(self).$method(<$out>::from(rhs.total))
            }
        }

        impl $trait<ResultList> for ResultList {
            type Output = $out;
            fn $method(self, rhs: ResultList) -> $out {
                <$out>::from(self.total).$method(<$out>::from(rhs.total))
            }
        }
    )*};
}

sum_arithmetic! {
    Add::add => i64,
    Sub::sub => i64,
    Mul::mul => i64,
}

impl Div<i64> for ResultList {
    type Output = f64;
    fn div(self, rhs: i64) -> f64 {
        self.total as f64 / rhs as f64
    }
}

impl Div<ResultList> for i64 {
    type Output = f64;
    fn div(self, rhs: ResultList) -> f64 {
        self as f64 / rhs.total as f64
    }
}

impl Div<ResultList> for ResultList {
    type Output = f64;
    fn div(self, rhs: ResultList) -> f64 {
        self.total as f64 / rhs.total as f64
    }
}

/// One `low..high -> outcome` row of a dice table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableEntry<T> {
    pub low: i64,
    pub high: i64,
    pub outcome: T,
}

impl<T> TableEntry<T> {
    pub fn contains(&self, roll: i64) -> bool {
        (self.low..=self.high).contains(&roll)
    }
}

/// The die a table rolls against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TableDie {
    /// Uniform over the lowest and highest declared bounds.
    Implicit { low: i64, high: i64 },
    /// An explicit expression; its total is looked up.
    Expr(DiceExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeStyle {
    Dots,
    Colon,
}

/// A compiled range table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiceTable<T = String> {
    die: TableDie,
    entries: Vec<TableEntry<T>>,
}

impl DiceTable<String> {
    /// Compile a table rolled against its own implicit die.
    pub fn compile(table: &str) -> Result<Self, DiceError> {
        let entries = parse_table(table)?;
        Self::from_entries(None, entries)
    }

    /// Compile a table rolled against an explicit dice expression.
    pub fn with_die(die: &str, table: &str) -> Result<Self, DiceError> {
        let die = DiceExpr::compile(die)?;
        let entries = parse_table(table)?;
        Self::from_entries(Some(die), entries)
    }
}

impl<T> DiceTable<T> {
    /// Build a table from ranges and outcomes. Ranges must be non-empty and
    /// must not overlap; gaps are allowed and fail at roll time.
    pub fn from_entries(
        die: Option<DiceExpr>,
        entries: Vec<(RangeInclusive<i64>, T)>,
    ) -> Result<Self, DiceError> {
        if entries.is_empty() {
            return Err(malformed("", "a table needs at least one entry"));
        }

        let entries: Vec<TableEntry<T>> = entries
            .into_iter()
            .map(|(range, outcome)| TableEntry {
                low: *range.start(),
                high: *range.end(),
                outcome,
            })
            .collect();

        for entry in &entries {
            if entry.low > entry.high {
                return Err(malformed(
                    &format!("{}..{}", entry.low, entry.high),
                    "empty range",
                ));
            }
        }

        let mut bounds: Vec<(i64, i64)> = entries.iter().map(|e| (e.low, e.high)).collect();
        bounds.sort_unstable();
        for pair in bounds.windows(2) {
            if pair[1].0 <= pair[0].1 {
                return Err(malformed(
                    &format!("{}..{}", pair[1].0, pair[1].1),
                    format!("overlaps range {}..{}", pair[0].0, pair[0].1),
                ));
            }
        }

        let die = match die {
            Some(expr) => TableDie::Expr(expr),
            None => TableDie::Implicit {
                low: bounds[0].0,
                high: bounds.iter().map(|b| b.1).max().unwrap_or(bounds[0].1),
            },
        };

        Ok(Self { die, entries })
    }

    pub fn die(&self) -> &TableDie {
        &self.die
    }

    pub fn entries(&self) -> &[TableEntry<T>] {
        &self.entries
    }

    /// Roll the table's die without looking anything up.
    pub fn roll_die(&self, rng: &mut dyn RandomSource) -> i64 {
        match &self.die {
            TableDie::Implicit { low, high } => rng.int_in_range(*low, *high),
            TableDie::Expr(expr) => expr.roll(rng).total(),
        }
    }

    /// Find the outcome whose range contains `roll`.
    pub fn lookup(&self, roll: i64) -> Result<&T, DiceError> {
        self.entries
            .iter()
            .find(|entry| entry.contains(roll))
            .map(|entry| &entry.outcome)
            .ok_or(DiceError::OutOfRangeRoll { roll })
    }

    /// Roll the die and look up the outcome.
    pub fn roll(&self, rng: &mut dyn RandomSource) -> Result<&T, DiceError> {
        let roll = self.roll_die(rng);
        self.lookup(roll)
    }

    /// Convert every outcome, keeping ranges and die.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> DiceTable<U> {
        DiceTable {
            die: self.die,
            entries: self
                .entries
                .into_iter()
                .map(|e| TableEntry {
                    low: e.low,
                    high: e.high,
                    outcome: f(e.outcome),
                })
                .collect(),
        }
    }
}

fn parse_table(table: &str) -> Result<Vec<(RangeInclusive<i64>, String)>, DiceError> {
    let trimmed = table.trim();
    if trimmed.is_empty() {
        return Err(malformed(table, "empty table"));
    }

    let (body, separator) = if trimmed.contains(';') {
        (trimmed.strip_suffix(';').unwrap_or(trimmed), ';')
    } else {
        (trimmed, '\n')
    };

    let mut style: Option<RangeStyle> = None;
    let mut entries = Vec::new();

    for raw in body.split(separator) {
        let entry = raw.trim();
        if entry.is_empty() {
            return Err(malformed(table, "empty table entry (repeated separator)"));
        }
        if entry.contains('\n') {
            return Err(malformed(
                table,
                "mixed entry separators; use either ';' or newlines",
            ));
        }
        let (range_text, outcome) = entry
            .split_once("->")
            .ok_or_else(|| malformed(entry, "expected '<range> -> <outcome>'"))?;
        let outcome = outcome.trim();
        if outcome.is_empty() {
            return Err(malformed(entry, "missing outcome"));
        }
        if outcome.contains("->") {
            return Err(malformed(entry, "one entry per range; found a second '->'"));
        }

        let (range, entry_style) = parse_range(range_text.trim())?;
        if let Some(entry_style) = entry_style {
            match style {
                None => style = Some(entry_style),
                Some(s) if s != entry_style => {
                    return Err(malformed(
                        table,
                        "mixed range separators; use either '..' or ':'",
                    ))
                }
                Some(_) => {}
            }
        }
        entries.push((range, outcome.to_string()));
    }

    Ok(entries)
}

fn parse_range(text: &str) -> Result<(RangeInclusive<i64>, Option<RangeStyle>), DiceError> {
    let parse_bound = |bound: &str| -> Result<i64, DiceError> {
        bound
            .trim()
            .parse::<i64>()
            .map_err(|_| malformed(text, format!("bound '{}' is not an integer", bound.trim())))
    };

    let (low, high, style) = if let Some((low, high)) = text.split_once("..") {
        (parse_bound(low)?, parse_bound(high)?, Some(RangeStyle::Dots))
    } else if let Some((low, high)) = text.split_once(':') {
        (parse_bound(low)?, parse_bound(high)?, Some(RangeStyle::Colon))
    } else if text == "-" || text.chars().skip(1).any(|c| c == '-') {
        return Err(malformed(
            text,
            "'-' is not a range separator; use '..' or ':'",
        ));
    } else {
        let value = parse_bound(text)?;
        (value, value, None)
    };

    if low > high {
        return Err(malformed(text, "empty range"));
    }
    Ok((low..=high, style))
}
