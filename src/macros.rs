/// Declares a closed enum backed by an explicit wire-string table.
///
/// Expands to the enum, an `ALL` slice in declaration order, `as_str()`,
/// `Display`, `AsRef<str>` and a case-insensitive `FromStr` that reports
/// unknown input through `$Err(String)`. The error type is declared by the
/// caller next to the invocation.
///
/// ```ignore
/// wire_enum! {
///     error_type: ParseColorError,
///     /// Doc comment for the enum.
///     pub enum Color {
///         Red => "red",
///         Blue => "blue",
///     }
/// }
/// ```
macro_rules! wire_enum {
    (
        error_type: $Err:ident,
        $(#[$enum_meta:meta])*
        $vis:vis enum $Name:ident {
            $(
                $(#[$var_meta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        $vis enum $Name {
            $(
                $(#[$var_meta])*
                $variant,
            )+
        }

        impl $Name {
            /// Every variant, in wire-table order.
            pub const ALL: &'static [$Name] = &[ $( $Name::$variant, )+ ];

            /// Wire-format string.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $Name::$variant => $wire, )+
                }
            }

            /// Look up a variant by its wire string, ignoring ASCII case.
            pub fn from_wire(s: &str) -> Option<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl std::str::FromStr for $Name {
            type Err = $Err;

            fn from_str(s: &str) -> Result<Self, $Err> {
                Self::from_wire(s).ok_or_else(|| $Err(s.to_string()))
            }
        }
    };
}
