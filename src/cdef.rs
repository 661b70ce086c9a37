/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Compiler and stack machine for CDEF expressions.
//!
//! A CDEF is a comma-separated expression in reverse Polish notation that
//! defines a derived curve in terms of other curves, e.g.
//! `apps,free,cached,+,+`. [`CdefScript::compile`] turns the text into a
//! flat token vector and computes, by abstract interpretation of stack
//! depths, the maximum stack size any evaluation can reach; expressions
//! that would underflow the stack or contain unresolvable names are
//! rejected at compile time.
//!
//! Evaluation happens per sample index through a [`DerivedSamples`] bound
//! to the iterators of every referenced curve, wrapped in an
//! [`RrdIterator`] by [`derived_iterator`]. The scratch stack is pre-sized
//! once and reused across samples.

use crate::rrd::RrdIterator;
use thiserror::Error;

/// Compilation failures; the graph owning the expression is skipped.
#[derive(Error, Debug)]
pub enum CdefError {
    #[error("unknown token '{0}'")]
    UnknownToken(String),
    #[error("'{token}' called with less than {needed} parameters")]
    StackUnderflow { token: String, needed: usize },
}

/// One compiled token.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CdefToken {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// Three-argument conditional: `cond,a,b,IF` yields `a` when `cond` is
    /// nonzero (or NaN), `b` otherwise.
    If,
    /// `UN`: 1 when the operand is NaN, 0 otherwise.
    IsNan,
    /// `TIME` yields NaN; absolute-time arithmetic is not used here.
    Time,
    Le,
    Ge,
    Constant(f64),
    /// Reference to a curve of the same graph, by arena index.
    Curve(usize),
}

impl CdefToken {
    /// Operands consumed from the stack; every token pushes exactly one.
    fn arity(self) -> usize {
        match self {
            CdefToken::Add
            | CdefToken::Sub
            | CdefToken::Mul
            | CdefToken::Div
            | CdefToken::Mod
            | CdefToken::Le
            | CdefToken::Ge => 2,
            CdefToken::If => 3,
            CdefToken::IsNan => 1,
            CdefToken::Time | CdefToken::Constant(_) | CdefToken::Curve(_) => 0,
        }
    }
}

/// A compiled CDEF expression.
#[derive(Clone, Debug, Default)]
pub struct CdefScript {
    tokens: Vec<CdefToken>,
    max_stack_size: usize,
}

impl CdefScript {
    /// Compiles `expr`, resolving curve names through `lookup`.
    ///
    /// Tokens are matched against the operator and keyword tables first,
    /// then parsed as strict numeric constants, then resolved as curve
    /// names; anything else is an [`CdefError::UnknownToken`].
    pub fn compile(
        expr: &str,
        mut lookup: impl FnMut(&str) -> Option<usize>,
    ) -> Result<CdefScript, CdefError> {
        let mut tokens = Vec::new();
        let mut stack_size = 0usize;
        let mut max_stack_size = 0usize;

        for word in expr.split(',').filter(|word| !word.is_empty()) {
            let token = match word {
                "+" => CdefToken::Add,
                "-" => CdefToken::Sub,
                "*" => CdefToken::Mul,
                "/" => CdefToken::Div,
                "%" => CdefToken::Mod,
                "IF" => CdefToken::If,
                "UN" => CdefToken::IsNan,
                "UNKN" => CdefToken::Constant(f64::NAN),
                "INF" => CdefToken::Constant(f64::INFINITY),
                "TIME" => CdefToken::Time,
                "LE" => CdefToken::Le,
                "GE" => CdefToken::Ge,
                _ => {
                    if let Ok(value) = word.parse::<f64>() {
                        CdefToken::Constant(value)
                    } else if let Some(curve) = lookup(word) {
                        CdefToken::Curve(curve)
                    } else {
                        return Err(CdefError::UnknownToken(word.to_string()));
                    }
                }
            };

            let needed = token.arity();
            if stack_size < needed {
                return Err(CdefError::StackUnderflow {
                    token: word.to_string(),
                    needed,
                });
            }
            stack_size = stack_size - needed + 1;
            max_stack_size = max_stack_size.max(stack_size);
            tokens.push(token);
        }

        Ok(CdefScript {
            tokens,
            max_stack_size,
        })
    }

    /// Upper bound on the evaluation stack depth.
    pub fn max_stack_size(&self) -> usize {
        self.max_stack_size
    }

    /// Number of compiled tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the expression compiled to nothing.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Arena indices of the curves the expression references.
    pub fn references(&self) -> impl Iterator<Item = usize> + '_ {
        self.tokens.iter().filter_map(|token| match token {
            CdefToken::Curve(curve) => Some(*curve),
            _ => None,
        })
    }
}

/// Evaluation state of one derived iterator: the script, one borrowed
/// iterator per referenced curve, and the reusable scratch stack.
#[derive(Clone, Debug)]
pub struct DerivedSamples<'a> {
    script: &'a CdefScript,
    bindings: Vec<Binding<'a>>,
    scratch: Vec<f64>,
}

#[derive(Clone, Debug)]
struct Binding<'a> {
    curve: usize,
    /// Rows the referenced curve is longer than the derived one; added to
    /// every index so all series stay aligned at the recent end.
    skew: usize,
    iter: RrdIterator<'a>,
}

impl DerivedSamples<'_> {
    /// Runs the script for one logical sample index. The top of the stack
    /// is the sample; an empty stack yields NaN.
    pub(crate) fn eval(&mut self, index: usize) -> f64 {
        let mut stack = std::mem::take(&mut self.scratch);
        stack.clear();

        let result = 'run: {
            for token in &self.script.tokens {
                match *token {
                    CdefToken::Constant(value) => stack.push(value),
                    CdefToken::Time => stack.push(f64::NAN),
                    CdefToken::Curve(curve) => {
                        let Some(binding) =
                            self.bindings.iter_mut().find(|b| b.curve == curve)
                        else {
                            break 'run f64::NAN;
                        };
                        if binding.iter.count() == 0 {
                            break 'run f64::NAN;
                        }
                        stack.push(binding.iter.peek_index(index + binding.skew));
                    }
                    CdefToken::IsNan => {
                        let Some(top) = stack.last_mut() else {
                            break 'run f64::NAN;
                        };
                        *top = if top.is_nan() { 1.0 } else { 0.0 };
                    }
                    CdefToken::If => {
                        let (Some(if_false), Some(if_true), Some(cond)) =
                            (stack.pop(), stack.pop(), stack.pop())
                        else {
                            break 'run f64::NAN;
                        };
                        stack.push(if cond != 0.0 { if_true } else { if_false });
                    }
                    _ => {
                        let (Some(rhs), Some(lhs)) = (stack.pop(), stack.pop()) else {
                            break 'run f64::NAN;
                        };
                        stack.push(match token {
                            CdefToken::Add => lhs + rhs,
                            CdefToken::Sub => lhs - rhs,
                            CdefToken::Mul => lhs * rhs,
                            CdefToken::Div => {
                                if !lhs.is_finite() || !rhs.is_finite() {
                                    f64::NAN
                                } else {
                                    lhs / rhs
                                }
                            }
                            CdefToken::Mod => {
                                if !lhs.is_finite() || !rhs.is_finite() {
                                    f64::NAN
                                } else {
                                    lhs % rhs
                                }
                            }
                            CdefToken::Le => (lhs <= rhs) as u8 as f64,
                            CdefToken::Ge => (lhs >= rhs) as u8 as f64,
                            _ => unreachable!(),
                        });
                    }
                }
            }
            stack.last().copied().unwrap_or(f64::NAN)
        };

        self.scratch = stack;
        result
    }
}

/// Instantiates the derived iterator of a CDEF curve for one
/// consolidation-function slot.
///
/// `resolve` supplies the iterator to read each referenced curve through;
/// the caller routes a self-reference to the raw archive iterator so that
/// evaluation cannot recurse. The derived length is the minimum of the
/// referenced lengths (`max_width` when nothing is referenced), and the
/// cursor is clipped so at most `max_width` samples are emitted.
pub fn derived_iterator<'a>(
    script: &'a CdefScript,
    max_width: usize,
    mut resolve: impl FnMut(usize) -> RrdIterator<'a>,
) -> RrdIterator<'a> {
    let mut bindings: Vec<Binding<'a>> = Vec::new();
    for curve in script.references() {
        if bindings.iter().any(|b| b.curve == curve) {
            continue;
        }
        bindings.push(Binding {
            curve,
            skew: 0,
            iter: resolve(curve),
        });
    }

    let count = bindings
        .iter()
        .map(|b| b.iter.count())
        .min()
        .unwrap_or(max_width);
    for binding in &mut bindings {
        binding.skew = binding.iter.count() - count;
    }

    let scratch = Vec::with_capacity(script.max_stack_size);
    RrdIterator::derived(
        DerivedSamples {
            script,
            bindings,
            scratch,
        },
        count,
        max_width,
    )
}
