use chumsky::{
    prelude::{choice, end, filter, just, recursive, Simple},
    text::{self, keyword, TextParser},
    Parser,
};
use typed_arena::Arena;

use crate::ast::{Expr, ExprBody, Program, Statement, Var};

fn string_literal() -> impl Parser<char, Vec<u8>, Error = Simple<char>> + Clone {
    let hex = filter(|c: &char| c.is_ascii_hexdigit());
    let hex_byte = just('x')
        .ignore_then(hex.clone().then(hex))
        .map(|(high, low): (char, char)| {
            let high = high.to_digit(16).unwrap_or_default();
            let low = low.to_digit(16).unwrap_or_default();
            vec![(high * 16 + low) as u8]
        });

    let escape = just('\\').ignore_then(choice((
        just('\\').to(vec![b'\\']),
        just('"').to(vec![b'"']),
        just('n').to(vec![b'\n']),
        just('t').to(vec![b'\t']),
        just('r').to(vec![b'\r']),
        just('0').to(vec![0u8]),
        hex_byte,
    )));

    let plain = filter(|c: &char| *c != '"' && *c != '\\').map(|c: char| {
        let mut buf = [0u8; 4];
        c.encode_utf8(&mut buf).as_bytes().to_vec()
    });

    escape
        .or(plain)
        .repeated()
        .delimited_by(just('"'), just('"'))
        .map(|parts: Vec<Vec<u8>>| parts.concat())
        .labelled("string literal")
}

fn expression<'a>(
    arena: &'a Arena<ExprBody<'a>>,
) -> impl Parser<char, Expr<'a>, Error = Simple<char>> + Clone + 'a {
    recursive(move |expr| {
        let int = text::int(10)
            .try_map(|digits: String, span| {
                digits
                    .parse::<u64>()
                    .map_err(|e| Simple::custom(span, format!("bad integer literal: {}", e)))
            })
            .map(ExprBody::Int);
        let string = string_literal().map(ExprBody::Str);
        let var = text::ident().map(|name: String| ExprBody::Var(Var::new(name)));

        let atom = choice((int, string, var))
            .map(move |body| &*arena.alloc(body))
            .or(expr.delimited_by(just('('), just(')')))
            .padded();

        let unary = recursive(move |unary| {
            just('-')
                .padded()
                .ignore_then(unary)
                .map(move |operand: Expr<'a>| &*arena.alloc(ExprBody::Neg(operand)))
                .or(atom)
        });

        let product = unary
            .clone()
            .then(just('*').padded().ignore_then(unary).repeated())
            .foldl(move |lhs: Expr<'a>, rhs: Expr<'a>| &*arena.alloc(ExprBody::Mul(lhs, rhs)));

        product
            .clone()
            .then(just('+').or(just('-')).padded().then(product).repeated())
            .foldl(move |lhs: Expr<'a>, (op, rhs): (char, Expr<'a>)| {
                let body = if op == '+' {
                    ExprBody::Add(lhs, rhs)
                } else {
                    ExprBody::Sub(lhs, rhs)
                };
                &*arena.alloc(body)
            })
    })
}

/// The parser of OSL source text. Expression nodes are allocated in `arena`.
pub fn parser<'a>(
    arena: &'a Arena<ExprBody<'a>>,
) -> impl Parser<char, Program<'a>, Error = Simple<char>> + 'a {
    let var = text::ident().map(Var::new).padded();

    let print_log = keyword("print_log").padded().to(Statement::PrintLog);
    let print = keyword("print")
        .padded()
        .ignore_then(var.clone())
        .map(Statement::Print);
    let delete = keyword("del")
        .padded()
        .ignore_then(var.clone())
        .map(Statement::Delete);
    let assign = var
        .then_ignore(just('=').padded())
        .then(expression(arena))
        .map(|(var, expr)| Statement::Assign(var, expr));

    let statement = choice((print_log, print, delete, assign)).then_ignore(just(';').padded());

    statement
        .repeated()
        .padded()
        .then_ignore(end())
        .map(Program::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse<'a>(arena: &'a Arena<ExprBody<'a>>, source: &str) -> Program<'a> {
        parser(arena).parse(source).unwrap()
    }

    #[test]
    fn parses_every_statement_kind() {
        let arena = Arena::new();
        let program = parse(&arena, "x = 1;\nprint x;\ndel x;\nprint_log;\n");
        assert_eq!(program.statements.len(), 4);
        assert_eq!(program.statements[0], Statement::Assign(Var::new("x"), &ExprBody::Int(1)));
        assert_eq!(program.statements[1], Statement::Print(Var::new("x")));
        assert_eq!(program.statements[2], Statement::Delete(Var::new("x")));
        assert_eq!(program.statements[3], Statement::PrintLog);
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let arena = Arena::new();
        let program = parse(&arena, "x = 1 + 2 * 3 - -4;");
        assert_eq!(program.statements[0].to_string(), "x = ((1 + (2 * 3)) - (-4));");
    }

    #[test]
    fn parentheses_group() {
        let arena = Arena::new();
        let program = parse(&arena, "y = (1 + 2) * x;");
        assert_eq!(program.statements[0].to_string(), "y = ((1 + 2) * x);");
    }

    #[test]
    fn string_escapes_become_bytes() {
        let arena = Arena::new();
        let program = parse(&arena, r#"s = "a\x00b\n\"\\";"#);
        match &program.statements[0] {
            Statement::Assign(_, ExprBody::Str(bytes)) => assert_eq!(bytes, b"a\0b\n\"\\"),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn long_names_parse() {
        let arena = Arena::new();
        let program = parse(&arena, "abc = 1;");
        assert_eq!(program.statements[0], Statement::Assign(Var::new("abc"), &ExprBody::Int(1)));
    }

    #[test]
    fn integer_overflow_is_rejected() {
        let arena = Arena::new();
        assert!(parser(&arena).parse("x = 18446744073709551616;").is_err());
    }

    #[test]
    fn missing_semicolon_is_rejected() {
        let arena = Arena::new();
        assert!(parser(&arena).parse("x = 1").is_err());
    }
}
