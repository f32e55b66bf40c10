//! A `nom`-based parser for the XPath 1.0 expression language.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace0},
    combinator::{map, map_res, opt, peek, recognize},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
};

use super::ast::*;
use crate::error::XPathError;

// --- Main Public Parser ---

pub fn parse_expression(input: &str) -> Result<Expression, XPathError> {
    match expression(input.trim()) {
        Ok(("", expr)) => Ok(expr),
        Ok((remainder, _)) => Err(XPathError::Syntax(
            input.to_string(),
            format!("unexpected trailing input at '{}'", remainder),
        )),
        Err(e) => Err(XPathError::Syntax(input.to_string(), e.to_string())),
    }
}

// --- Combinators & Helpers ---

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    delimited(multispace0, inner, multispace0)
}

/// `and`, `or`, `div`, `mod` are operators only when not glued to further
/// name characters (`division` is a name, not `div` + `ision`).
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        let (rest, matched) = tag(word)(input)?;
        if rest.chars().next().is_some_and(is_name_char) {
            Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )))
        } else {
            Ok((rest, matched))
        }
    }
}

/// Left-associative fold over one precedence level.
fn binary_fold<'a>(
    input: &'a str,
    mut operand: impl FnMut(&'a str) -> IResult<&'a str, Expression>,
    mut op: impl FnMut(&'a str) -> IResult<&'a str, BinaryOperator>,
) -> IResult<&'a str, Expression> {
    let (mut rest, mut left) = operand(input)?;
    loop {
        let (after_ws, _) = multispace0::<&'a str, nom::error::Error<&'a str>>(rest)?;
        let Ok((after_op, operator)) = op(after_ws) else {
            break;
        };
        let (after_op, _) = multispace0(after_op)?;
        let (after_right, right) = operand(after_op)?;
        left = Expression::BinaryOp {
            left: Box::new(left),
            op: operator,
            right: Box::new(right),
        };
        rest = after_right;
    }
    Ok((rest, left))
}

// --- Expression Parsers (in order of precedence) ---

fn expression(input: &str) -> IResult<&str, Expression> {
    or_expr(input)
}

fn or_op(input: &str) -> IResult<&str, BinaryOperator> {
    map(keyword("or"), |_| BinaryOperator::Or)(input)
}

fn and_op(input: &str) -> IResult<&str, BinaryOperator> {
    map(keyword("and"), |_| BinaryOperator::And)(input)
}

fn equality_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(tag("="), |_| BinaryOperator::Equals),
        map(tag("!="), |_| BinaryOperator::NotEquals),
    ))(input)
}

fn relational_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(tag("<="), |_| BinaryOperator::LessThanOrEqual),
        map(tag("&lt;="), |_| BinaryOperator::LessThanOrEqual),
        map(tag(">="), |_| BinaryOperator::GreaterThanOrEqual),
        map(tag("&gt;="), |_| BinaryOperator::GreaterThanOrEqual),
        map(tag("<"), |_| BinaryOperator::LessThan),
        map(tag("&lt;"), |_| BinaryOperator::LessThan),
        map(tag(">"), |_| BinaryOperator::GreaterThan),
        map(tag("&gt;"), |_| BinaryOperator::GreaterThan),
    ))(input)
}

fn additive_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(char('+'), |_| BinaryOperator::Plus),
        map(char('-'), |_| BinaryOperator::Minus),
    ))(input)
}

fn multiplicative_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(char('*'), |_| BinaryOperator::Multiply),
        map(keyword("div"), |_| BinaryOperator::Divide),
        map(keyword("mod"), |_| BinaryOperator::Modulo),
    ))(input)
}

fn union_op(input: &str) -> IResult<&str, BinaryOperator> {
    map(char('|'), |_| BinaryOperator::Union)(input)
}

fn or_expr(input: &str) -> IResult<&str, Expression> {
    binary_fold(input, and_expr, or_op)
}

fn and_expr(input: &str) -> IResult<&str, Expression> {
    binary_fold(input, equality_expr, and_op)
}

fn equality_expr(input: &str) -> IResult<&str, Expression> {
    binary_fold(input, relational_expr, equality_op)
}

fn relational_expr(input: &str) -> IResult<&str, Expression> {
    binary_fold(input, additive_expr, relational_op)
}

fn additive_expr(input: &str) -> IResult<&str, Expression> {
    binary_fold(input, multiplicative_expr, additive_op)
}

fn multiplicative_expr(input: &str) -> IResult<&str, Expression> {
    binary_fold(input, unary_expr, multiplicative_op)
}

fn unary_expr(input: &str) -> IResult<&str, Expression> {
    let (i, minuses) = many0(ws(char('-')))(input)?;
    let (i, mut expr) = union_expr(i)?;
    for _ in minuses {
        expr = Expression::UnaryOp {
            op: UnaryOperator::Minus,
            expr: Box::new(expr),
        };
    }
    Ok((i, expr))
}

fn union_expr(input: &str) -> IResult<&str, Expression> {
    binary_fold(input, path_expr, union_op)
}

/// One `/`-separated element of a path continuation: usually a step, but a
/// trailing function call is applied to the selected nodes instead.
enum PathComponent {
    Step(Step),
    Call(Expression),
}

fn path_component(input: &str) -> IResult<&str, PathComponent> {
    alt((
        map(function_call, PathComponent::Call),
        map(step, PathComponent::Step),
    ))(input)
}

/// Attaches relative steps to an expression, folding into an existing
/// location path where possible.
fn attach_steps(expr: Expression, steps: Vec<Step>) -> Expression {
    if steps.is_empty() {
        return expr;
    }
    match expr {
        Expression::LocationPath(mut lp) => {
            lp.steps.extend(steps);
            Expression::LocationPath(lp)
        }
        other => Expression::Path {
            start: Box::new(other),
            path: LocationPath {
                is_absolute: false,
                steps,
            },
        },
    }
}

/// The core parser handling the ambiguity between location paths and other
/// primary expressions that may be continued by a path.
fn path_expr(input: &str) -> IResult<&str, Expression> {
    let (input, _) = multispace0(input)?;
    // Primary expressions are tried first: `position()` must parse as a
    // function call before the path parser can mistake `position` for a
    // step name.
    let (i, start) = alt((filter_expr, map(location_path, Expression::LocationPath)))(input)?;
    let (i, continuation) =
        many0(pair(ws(alt((tag("//"), tag("/")))), path_component))(i)?;

    let mut current = start;
    let mut pending: Vec<Step> = Vec::new();
    for (separator, component) in continuation {
        if separator == "//" {
            pending.push(Step::any_node(Axis::DescendantOrSelf));
        }
        match component {
            PathComponent::Step(next) => pending.push(next),
            PathComponent::Call(call) => {
                current = attach_steps(current, std::mem::take(&mut pending));
                current = Expression::ContextCall {
                    source: Box::new(current),
                    call: Box::new(call),
                };
            }
        }
    }
    Ok((i, attach_steps(current, pending)))
}

/// A primary expression with optional predicates, e.g. `(//q)[1]`.
fn filter_expr(input: &str) -> IResult<&str, Expression> {
    let (i, primary) = primary_expr(input)?;
    let (i, predicates) = many0(predicate)(i)?;
    if predicates.is_empty() {
        Ok((i, primary))
    } else {
        Ok((
            i,
            Expression::Filter {
                primary: Box::new(primary),
                predicates,
            },
        ))
    }
}

fn primary_expr(input: &str) -> IResult<&str, Expression> {
    ws(alt((
        variable_reference,
        map(number_literal, Expression::Number),
        map(string_literal, Expression::Literal),
        function_call,
        delimited(ws(char('(')), expression, ws(char(')'))),
    )))(input)
}

// --- Literal Parsers ---

fn string_literal(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
        )),
        |s: &str| s.to_string(),
    )(input)
}

/// Number per the XPath lexical form: `digits`, `digits.digits?`, or
/// `.digits`. No sign, no exponent.
fn number_literal(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        ))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

// --- Name Parsers ---

fn is_name_start_char(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn nc_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(is_name_start_char),
        take_while(is_name_char),
    ))(input)
}

/// A possibly-prefixed name as written, e.g. `xsl:template`.
fn q_name(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(nc_name, opt(pair(char(':'), nc_name)))),
        |s: &str| s.to_string(),
    )(input)
}

fn prefixed_name(input: &str) -> IResult<&str, (Option<String>, String)> {
    let (i, first) = nc_name(input)?;
    let (i, second) = opt(preceded(char(':'), nc_name))(i)?;
    Ok((
        i,
        match second {
            Some(local) => (Some(first.to_string()), local.to_string()),
            None => (None, first.to_string()),
        },
    ))
}

// --- Variable Reference Parser ---

fn variable_reference(input: &str) -> IResult<&str, Expression> {
    map(preceded(char('$'), q_name), Expression::Variable)(input)
}

// --- NodeTest Parsers ---

fn node_type_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        map(
            delimited(
                pair(tag("processing-instruction"), ws(char('('))),
                opt(ws(string_literal)),
                char(')'),
            ),
            |target| NodeTest::NodeType(NodeTypeTest::ProcessingInstruction(target)),
        ),
        map(
            terminated(
                alt((tag("node"), tag("text"), tag("comment"))),
                pair(ws(char('(')), char(')')),
            ),
            |node_type: &str| match node_type {
                "text" => NodeTest::NodeType(NodeTypeTest::Text),
                "comment" => NodeTest::NodeType(NodeTypeTest::Comment),
                _ => NodeTest::NodeType(NodeTypeTest::Node),
            },
        ),
    ))(input)
}

pub fn node_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        node_type_test,
        map(terminated(nc_name, tag(":*")), |prefix: &str| {
            NodeTest::PrefixWildcard(prefix.to_string())
        }),
        map(char('*'), |_| NodeTest::Wildcard),
        map(prefixed_name, |(prefix, local)| NodeTest::Name {
            prefix,
            local,
        }),
    ))(input)
}

// --- Path Parsers ---

fn axis_name(input: &str) -> IResult<&str, Axis> {
    map(
        alt((
            tag("ancestor-or-self"),
            tag("ancestor"),
            tag("attribute"),
            tag("child"),
            tag("descendant-or-self"),
            tag("descendant"),
            tag("following-sibling"),
            tag("following"),
            tag("namespace"),
            tag("parent"),
            tag("preceding-sibling"),
            tag("preceding"),
            tag("self"),
        )),
        |axis: &str| match axis {
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "ancestor" => Axis::Ancestor,
            "attribute" => Axis::Attribute,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "descendant" => Axis::Descendant,
            "following-sibling" => Axis::FollowingSibling,
            "following" => Axis::Following,
            "namespace" => Axis::Namespace,
            "parent" => Axis::Parent,
            "preceding-sibling" => Axis::PrecedingSibling,
            "preceding" => Axis::Preceding,
            "self" => Axis::SelfAxis,
            _ => Axis::Child,
        },
    )(input)
}

fn axis_specifier(input: &str) -> IResult<&str, Axis> {
    alt((
        terminated(axis_name, ws(tag("::"))),
        map(char('@'), |_| Axis::Attribute),
    ))(input)
}

fn predicate(input: &str) -> IResult<&str, Expression> {
    delimited(ws(char('[')), expression, ws(char(']')))(input)
}

fn step(input: &str) -> IResult<&str, Step> {
    // `..` before `.`: the longer abbreviation wins.
    if let Ok((i, _)) = tag::<&str, &str, nom::error::Error<&str>>("..")(input) {
        return Ok((i, Step::any_node(Axis::Parent)));
    }
    if let Ok((i, _)) = tag::<&str, &str, nom::error::Error<&str>>(".")(input) {
        return Ok((i, Step::any_node(Axis::SelfAxis)));
    }
    let (i, axis) = opt(axis_specifier)(input)?;
    let (i, _) = multispace0(i)?;
    let (i, node_test) = node_test(i)?;
    // An axis-less name directly followed by '(' is a function call in path
    // position, not a step; leave it for the path parser.
    if axis.is_none()
        && matches!(node_test, NodeTest::Name { .. })
        && i.trim_start().starts_with('(')
    {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    let (i, predicates) = many0(predicate)(i)?;
    Ok((
        i,
        Step {
            axis: axis.unwrap_or(Axis::Child),
            node_test,
            predicates,
        },
    ))
}

fn location_path(input: &str) -> IResult<&str, LocationPath> {
    let (i, (is_absolute, mut steps)) =
        if let Ok((rest, _)) = tag::<&str, &str, nom::error::Error<&str>>("//")(input) {
            let (rest, _) = multispace0(rest)?;
            let (rest, first) = step(rest)?;
            (rest, (true, vec![Step::any_node(Axis::DescendantOrSelf), first]))
        } else if let Ok((rest, _)) = tag::<&str, &str, nom::error::Error<&str>>("/")(input) {
            let (after_ws, _) = multispace0::<&str, nom::error::Error<&str>>(rest)?;
            match step(after_ws) {
                Ok((rest, first)) => (rest, (true, vec![first])),
                // A path that is just "/".
                Err(_) => (rest, (true, vec![])),
            }
        } else {
            let (rest, first) = step(input)?;
            (rest, (false, vec![first]))
        };

    let (i, remainder) = many0(pair(ws(alt((tag("//"), tag("/")))), step))(i)?;
    for (separator, next) in remainder {
        if separator == "//" {
            steps.push(Step::any_node(Axis::DescendantOrSelf));
        }
        steps.push(next);
    }

    Ok((i, LocationPath { is_absolute, steps }))
}

// --- Function Call Parser ---

fn function_call(input: &str) -> IResult<&str, Expression> {
    // A function call must be a QName followed by '('. The lookahead avoids
    // parsing a step name (like 'foo' in 'foo/bar') as a function.
    let (i, name) = q_name(input)?;
    let (i, _) = peek(ws(char('(')))(i)?;

    // Node-type tests like text() are not functions; the step parser owns
    // those names.
    if matches!(
        name.as_str(),
        "text" | "node" | "comment" | "processing-instruction"
    ) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }

    let (i, _) = multispace0(i)?;
    let (i, args) = delimited(
        char('('),
        separated_list0(ws(char(',')), expression),
        ws(char(')')),
    )(i)?;

    Ok((i, Expression::FunctionCall { name, args }))
}
