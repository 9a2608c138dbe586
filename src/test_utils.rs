pub mod ast {
    macro_rules! and {
        ($left:expr, $right:expr) => {
            Expr::and($left, $right, Position::default())
        };
    }

    macro_rules! or {
        ($left:expr, $right:expr) => {
            Expr::or($left, $right, Position::default())
        };
    }

    macro_rules! not {
        ($child:expr) => {
            Expr::not($child, Position::default())
        };
    }

    macro_rules! cmp {
        ($op:expr, $left:expr, $right:expr) => {
            Expr::compare($op, $left, $right, Position::default())
        };
    }

    macro_rules! contains {
        ($left:expr, $right:expr) => {
            Expr::contains($left, $right, Position::default())
        };
    }

    macro_rules! ident {
        ($name:expr) => {
            Expr::identifier($name.to_owned(), Position::default())
        };
    }

    macro_rules! string {
        ($value:expr) => {
            Expr::string($value.to_owned(), Position::default())
        };
    }

    macro_rules! num {
        ($value:expr) => {
            Expr::number(rust_decimal::Decimal::from($value as i64), Position::default())
        };
    }

    macro_rules! constant {
        ($value:expr) => {
            Expr::constant($value, Position::default())
        };
    }

    macro_rules! set {
        ($($member:expr),* $(,)?) => {
            Expr::literal_set(vec![$($member),*], Position::default())
        };
    }

    pub(crate) use and;
    pub(crate) use cmp;
    pub(crate) use constant;
    pub(crate) use contains;
    pub(crate) use ident;
    pub(crate) use not;
    pub(crate) use num;
    pub(crate) use or;
    pub(crate) use set;
    pub(crate) use string;
}
