//! Macros for the whole app

/// Generates conversions and the diesel plumbing a typed id wrapper needs
/// to be used in queries and inserts. The struct itself is declared at the
/// call site, so copyable ids stay `Copy` and string ids do not.
macro_rules! newtype_id {
    ($name:ident, $raw:ty, $sql:ty) => {
        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = <$raw as ::std::str::FromStr>::Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<$raw>().map($name)
            }
        }

        impl From<$raw> for $name {
            fn from(raw: $raw) -> Self {
                $name(raw)
            }
        }

        impl ::diesel::expression::AsExpression<$sql> for $name {
            type Expression = ::diesel::expression::bound::Bound<$sql, Self>;

            fn as_expression(self) -> Self::Expression {
                ::diesel::expression::bound::Bound::new(self)
            }
        }

        impl<'a> ::diesel::expression::AsExpression<$sql> for &'a $name {
            type Expression = ::diesel::expression::bound::Bound<$sql, Self>;

            fn as_expression(self) -> Self::Expression {
                ::diesel::expression::bound::Bound::new(self)
            }
        }

        impl ::diesel::expression::AsExpression<::diesel::sql_types::Nullable<$sql>> for $name {
            type Expression = ::diesel::expression::bound::Bound<::diesel::sql_types::Nullable<$sql>, Self>;

            fn as_expression(self) -> Self::Expression {
                ::diesel::expression::bound::Bound::new(self)
            }
        }

        impl<'a> ::diesel::expression::AsExpression<::diesel::sql_types::Nullable<$sql>> for &'a $name {
            type Expression = ::diesel::expression::bound::Bound<::diesel::sql_types::Nullable<$sql>, Self>;

            fn as_expression(self) -> Self::Expression {
                ::diesel::expression::bound::Bound::new(self)
            }
        }

        impl ::diesel::serialize::ToSql<$sql, ::diesel::pg::Pg> for $name {
            fn to_sql<W: ::std::io::Write>(
                &self,
                out: &mut ::diesel::serialize::Output<W, ::diesel::pg::Pg>,
            ) -> ::diesel::serialize::Result {
                <$raw as ::diesel::serialize::ToSql<$sql, ::diesel::pg::Pg>>::to_sql(&self.0, out)
            }
        }

        impl ::diesel::deserialize::FromSql<$sql, ::diesel::pg::Pg> for $name {
            fn from_sql(bytes: Option<&[u8]>) -> ::diesel::deserialize::Result<Self> {
                <$raw as ::diesel::deserialize::FromSql<$sql, ::diesel::pg::Pg>>::from_sql(bytes).map($name)
            }
        }

        impl ::diesel::serialize::ToSql<::diesel::sql_types::Nullable<$sql>, ::diesel::pg::Pg> for $name {
            fn to_sql<W: ::std::io::Write>(
                &self,
                out: &mut ::diesel::serialize::Output<W, ::diesel::pg::Pg>,
            ) -> ::diesel::serialize::Result {
                ::diesel::serialize::ToSql::<$sql, ::diesel::pg::Pg>::to_sql(self, out)
            }
        }

        impl ::diesel::deserialize::Queryable<$sql, ::diesel::pg::Pg> for $name {
            type Row = $raw;

            fn build(row: Self::Row) -> Self {
                $name(row)
            }
        }
    };
}

/// Builds `validator::ValidationErrors` from field/message literals, e.g.
/// `validation_errors!({"claim_id": ["claim_id" => "Already refunded"]})`.
macro_rules! validation_errors {
    ({$($field:tt: [$($code:tt => $msg:tt),*]),*}) => {{
        let mut errors = ::validator::ValidationErrors::new();
        $($(
            errors.add(
                $field,
                ::validator::ValidationError {
                    code: ::std::borrow::Cow::from($code),
                    message: Some(::std::borrow::Cow::from($msg)),
                    params: ::std::collections::HashMap::new(),
                },
            );
        )*)*
        errors
    }};
}

/// Generates the diesel plumbing for an enum stored as `VarChar`.
macro_rules! enum_as_varchar {
    ($name:ident) => {
        impl ::diesel::expression::AsExpression<::diesel::sql_types::VarChar> for $name {
            type Expression = ::diesel::expression::bound::Bound<::diesel::sql_types::VarChar, Self>;

            fn as_expression(self) -> Self::Expression {
                ::diesel::expression::bound::Bound::new(self)
            }
        }

        impl<'a> ::diesel::expression::AsExpression<::diesel::sql_types::VarChar> for &'a $name {
            type Expression = ::diesel::expression::bound::Bound<::diesel::sql_types::VarChar, Self>;

            fn as_expression(self) -> Self::Expression {
                ::diesel::expression::bound::Bound::new(self)
            }
        }

        impl ::diesel::serialize::ToSql<::diesel::sql_types::VarChar, ::diesel::pg::Pg> for $name {
            fn to_sql<W: ::std::io::Write>(
                &self,
                out: &mut ::diesel::serialize::Output<W, ::diesel::pg::Pg>,
            ) -> ::diesel::serialize::Result {
                let as_str = self.to_string();
                <String as ::diesel::serialize::ToSql<::diesel::sql_types::VarChar, ::diesel::pg::Pg>>::to_sql(&as_str, out)
            }
        }

        impl ::diesel::deserialize::FromSql<::diesel::sql_types::VarChar, ::diesel::pg::Pg> for $name {
            fn from_sql(bytes: Option<&[u8]>) -> ::diesel::deserialize::Result<Self> {
                let as_str = <String as ::diesel::deserialize::FromSql<
                    ::diesel::sql_types::VarChar,
                    ::diesel::pg::Pg,
                >>::from_sql(bytes)?;
                as_str.parse::<$name>().map_err(|_| format!("Unrecognized enum variant: {}", as_str).into())
            }
        }
    };
}
