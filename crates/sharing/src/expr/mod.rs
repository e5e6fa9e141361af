// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Minimal predicate-tree representation.
//!
//! Query engines carry their own expression classes; the integration layer
//! lowers those into this small tree before handing them to the client. The
//! tree knows just enough structure to be fingerprinted canonically and to
//! be translated into the wire predicate grammar; anything an engine cannot
//! express here is simply not pushed down.

pub mod translate;

use std::fmt;

/// Normalized value type attached to columns and literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Boolean.
    Bool,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Calendar date.
    Date,
    /// Instant in time.
    Timestamp,
}

impl ValueType {
    /// The tag used for this type in the wire predicate grammar.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Date => "date",
            ValueType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire_str())
    }
}

/// Comparison operators between a column and a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Equal,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
}

impl CompareOp {
    /// The tag used for this operator in the wire predicate grammar.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            CompareOp::Equal => "equal",
            CompareOp::GreaterThan => "greaterThan",
            CompareOp::GreaterThanOrEqual => "greaterThanOrEqual",
            CompareOp::LessThan => "lessThan",
            CompareOp::LessThanOrEqual => "lessThanOrEqual",
        }
    }

    /// The operator obtained by swapping the two operands.
    pub fn reversed(&self) -> CompareOp {
        match self {
            CompareOp::Equal => CompareOp::Equal,
            CompareOp::GreaterThan => CompareOp::LessThan,
            CompareOp::GreaterThanOrEqual => CompareOp::LessThanOrEqual,
            CompareOp::LessThan => CompareOp::GreaterThan,
            CompareOp::LessThanOrEqual => CompareOp::GreaterThanOrEqual,
        }
    }
}

/// A node of the predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column operand.
    Column {
        /// Column name.
        name: String,
        /// Normalized column type.
        value_type: ValueType,
    },
    /// A literal operand, stored as its string representation.
    Literal {
        /// String form of the value.
        value: String,
        /// Normalized literal type.
        value_type: ValueType,
    },
    /// A binary comparison.
    Compare {
        /// Comparison operator.
        op: CompareOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Conjunction of two or more children.
    And(Vec<Expr>),
    /// Disjunction of two or more children.
    Or(Vec<Expr>),
    /// Logical negation.
    Not(Box<Expr>),
    /// Null check on a column.
    IsNull(Box<Expr>),
    /// Membership test of a column against a literal list.
    In {
        /// The probed column.
        column: Box<Expr>,
        /// Literal candidates, order preserved.
        list: Vec<Expr>,
    },
}

impl Expr {
    /// A column operand.
    pub fn column(name: impl Into<String>, value_type: ValueType) -> Expr {
        Expr::Column {
            name: name.into(),
            value_type,
        }
    }

    /// A literal operand.
    pub fn literal(value: impl Into<String>, value_type: ValueType) -> Expr {
        Expr::Literal {
            value: value.into(),
            value_type,
        }
    }

    /// Conjunction. A single child is returned unwrapped.
    pub fn and(mut children: Vec<Expr>) -> Expr {
        if children.len() == 1 {
            children.pop().expect("len checked")
        } else {
            Expr::And(children)
        }
    }

    /// Disjunction. A single child is returned unwrapped.
    pub fn or(mut children: Vec<Expr>) -> Expr {
        if children.len() == 1 {
            children.pop().expect("len checked")
        } else {
            Expr::Or(children)
        }
    }

    /// Logical negation of this predicate.
    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// Whether this node is a boolean predicate (as opposed to an operand).
    pub fn is_predicate(&self) -> bool {
        match self {
            Expr::Column { value_type, .. } => *value_type == ValueType::Bool,
            Expr::Literal { .. } => false,
            Expr::Compare { .. }
            | Expr::And(_)
            | Expr::Or(_)
            | Expr::Not(_)
            | Expr::IsNull(_)
            | Expr::In { .. } => true,
        }
    }

    /// Canonical structural rendering of this tree.
    ///
    /// Two trees that mean the same thing render identically: comparisons
    /// are normalized column-first (reversing the operator when the literal
    /// was on the left), and the children of `And`/`Or` are sorted by their
    /// own canonical form. Operator, literal value, and value type all
    /// remain significant.
    pub fn canonical_form(&self) -> String {
        match self {
            Expr::Column { name, value_type } => format!("col({name}:{value_type})"),
            Expr::Literal { value, value_type } => format!("lit({value}:{value_type})"),
            Expr::Compare { op, left, right } => {
                let (op, left, right) = if matches!(left.as_ref(), Expr::Literal { .. })
                    && matches!(right.as_ref(), Expr::Column { .. })
                {
                    (op.reversed(), right, left)
                } else {
                    (*op, left, right)
                };
                format!(
                    "{}({},{})",
                    op.as_wire_str(),
                    left.canonical_form(),
                    right.canonical_form()
                )
            }
            Expr::And(children) => format!("and({})", sorted_forms(children)),
            Expr::Or(children) => format!("or({})", sorted_forms(children)),
            Expr::Not(child) => format!("not({})", child.canonical_form()),
            Expr::IsNull(child) => format!("isNull({})", child.canonical_form()),
            Expr::In { column, list } => {
                let list = list
                    .iter()
                    .map(Expr::canonical_form)
                    .collect::<Vec<_>>()
                    .join(",");
                format!("in({},[{list}])", column.canonical_form())
            }
        }
    }
}

fn sorted_forms(children: &[Expr]) -> String {
    let mut forms: Vec<String> = children.iter().map(Expr::canonical_form).collect();
    forms.sort_unstable();
    forms.join(",")
}

/// A named column to build predicates against, in the fluent style.
///
/// ```rust
/// use delta_sharing::expr::{Reference, ValueType};
///
/// let pred = Reference::new("id", ValueType::Int).equal("23");
/// assert!(pred.is_predicate());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    name: String,
    value_type: ValueType,
}

impl Reference {
    /// Creates a reference to the named column.
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }

    fn column(&self) -> Expr {
        Expr::column(self.name.clone(), self.value_type)
    }

    fn literal(&self, value: impl Into<String>) -> Expr {
        Expr::literal(value, self.value_type)
    }

    fn compare(&self, op: CompareOp, value: impl Into<String>) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(self.column()),
            right: Box::new(self.literal(value)),
        }
    }

    /// `column = value`
    pub fn equal(&self, value: impl Into<String>) -> Expr {
        self.compare(CompareOp::Equal, value)
    }

    /// `column > value`
    pub fn greater_than(&self, value: impl Into<String>) -> Expr {
        self.compare(CompareOp::GreaterThan, value)
    }

    /// `column >= value`
    pub fn greater_than_or_equal(&self, value: impl Into<String>) -> Expr {
        self.compare(CompareOp::GreaterThanOrEqual, value)
    }

    /// `column < value`
    pub fn less_than(&self, value: impl Into<String>) -> Expr {
        self.compare(CompareOp::LessThan, value)
    }

    /// `column <= value`
    pub fn less_than_or_equal(&self, value: impl Into<String>) -> Expr {
        self.compare(CompareOp::LessThanOrEqual, value)
    }

    /// `column IS NULL`
    pub fn is_null(&self) -> Expr {
        Expr::IsNull(Box::new(self.column()))
    }

    /// `column IN (values...)`
    pub fn is_in<I, S>(&self, values: I) -> Expr
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::In {
            column: Box::new(self.column()),
            list: values.into_iter().map(|v| self.literal(v)).collect(),
        }
    }
}
