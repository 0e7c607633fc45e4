use proc_macro2::Span;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, ExprLit, Ident, Lit, LitStr, MetaNameValue, Path, Token, Type};

/// `#[entity(name = "...", table = "...", validators = path, filters = path)]`
#[derive(Default)]
pub struct EntityArgs {
    pub name: Option<LitStr>,
    pub table: Option<LitStr>,
    pub validators: Option<Path>,
    pub filters: Option<Path>,
}

/// One `name: Type` entry of `#[fields(...)]`.
pub struct FieldDecl {
    pub ident: Ident,
    pub ty: Type,
}

impl Parse for FieldDecl {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let ident: Ident = input.parse()?;
        input.parse::<Token![:]>()?;
        let ty: Type = input.parse()?;
        Ok(Self { ident, ty })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKind {
    fn from_attr(attr: &Attribute) -> Option<Self> {
        let path = attr.path();
        if path.is_ident("one_to_one") {
            Some(Self::OneToOne)
        } else if path.is_ident("one_to_many") {
            Some(Self::OneToMany)
        } else if path.is_ident("many_to_many") {
            Some(Self::ManyToMany)
        } else {
            None
        }
    }
}

/// `#[many_to_many(Tag, parent = "...", child = "...", name = "...")]` and friends.
pub struct RelationDecl {
    pub kind: RelationKind,
    pub target: Path,
    pub parent: Option<LitStr>,
    pub child: Option<LitStr>,
    pub name: Option<LitStr>,
}

struct RelationArgs {
    target: Path,
    options: Vec<MetaNameValue>,
}

impl Parse for RelationArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let target: Path = input.parse()?;
        let mut options = Vec::new();
        while input.peek(Token![,]) {
            input.parse::<Token![,]>()?;
            if input.is_empty() {
                break;
            }
            options.push(input.parse()?);
        }
        Ok(Self { target, options })
    }
}

fn lit_str(value: &Expr) -> syn::Result<LitStr> {
    match value {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.clone()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

fn path(value: &Expr) -> syn::Result<Path> {
    match value {
        Expr::Path(p) => Ok(p.path.clone()),
        other => Err(syn::Error::new_spanned(other, "expected a function path")),
    }
}

fn key_of(nv: &MetaNameValue) -> String {
    nv.path
        .get_ident()
        .map(ToString::to_string)
        .unwrap_or_default()
}

pub fn entity_args(attrs: &[Attribute]) -> syn::Result<EntityArgs> {
    let mut args = EntityArgs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("entity")) {
        let items = attr.parse_args_with(Punctuated::<MetaNameValue, Token![,]>::parse_terminated)?;
        for nv in items {
            match key_of(&nv).as_str() {
                "name" => args.name = Some(lit_str(&nv.value)?),
                "table" => args.table = Some(lit_str(&nv.value)?),
                "validators" => args.validators = Some(path(&nv.value)?),
                "filters" => args.filters = Some(path(&nv.value)?),
                _ => {
                    return Err(syn::Error::new_spanned(
                        &nv.path,
                        "unknown entity option, expected `name`, `table`, `validators` or `filters`",
                    ));
                }
            }
        }
    }
    Ok(args)
}

pub fn field_decls(attrs: &[Attribute]) -> syn::Result<Vec<FieldDecl>> {
    let mut fields: Vec<FieldDecl> = Vec::new();
    for attr in attrs.iter().filter(|a| a.path().is_ident("fields")) {
        let items = attr.parse_args_with(Punctuated::<FieldDecl, Token![,]>::parse_terminated)?;
        for field in items {
            if field.ident == "id" {
                return Err(syn::Error::new(
                    field.ident.span(),
                    "`id` is implicit and must not be declared",
                ));
            }
            if fields.iter().any(|f| f.ident == field.ident) {
                return Err(syn::Error::new(field.ident.span(), "field declared twice"));
            }
            fields.push(field);
        }
    }
    Ok(fields)
}

pub fn relation_decls(attrs: &[Attribute]) -> syn::Result<Vec<RelationDecl>> {
    let mut relations = Vec::new();
    for attr in attrs {
        let Some(kind) = RelationKind::from_attr(attr) else {
            continue;
        };
        let args: RelationArgs = attr.parse_args()?;
        let mut decl = RelationDecl {
            kind,
            target: args.target,
            parent: None,
            child: None,
            name: None,
        };
        for nv in &args.options {
            match (key_of(nv).as_str(), kind) {
                ("name", _) => decl.name = Some(lit_str(&nv.value)?),
                ("parent", _) | ("column", RelationKind::OneToOne) => {
                    decl.parent = Some(lit_str(&nv.value)?)
                }
                ("child", RelationKind::OneToMany | RelationKind::ManyToMany) => {
                    decl.child = Some(lit_str(&nv.value)?)
                }
                _ => {
                    return Err(syn::Error::new_spanned(
                        &nv.path,
                        "unknown relation option, expected `parent`, `child`, `column` or `name`",
                    ));
                }
            }
        }
        relations.push(decl);
    }
    Ok(relations)
}

/// `es` after `s` or `h`, `s` otherwise.
pub fn pluralize(word: &str) -> String {
    if word.ends_with('s') || word.ends_with('h') {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    }
}

impl RelationDecl {
    fn target_name(&self) -> String {
        self.target
            .segments
            .last()
            .map(|s| s.ident.to_string())
            .unwrap_or_default()
    }

    /// Record key, also used as the accessor name.
    pub fn key(&self) -> String {
        match (&self.name, self.kind) {
            (Some(name), _) => name.value(),
            (None, RelationKind::OneToOne) => self.target_name().to_lowercase(),
            (None, _) => pluralize(&self.target_name().to_lowercase()),
        }
    }

    pub fn key_ident(&self) -> syn::Result<Ident> {
        let key = self.key();
        let span = self.name.as_ref().map_or_else(Span::call_site, LitStr::span);
        syn::parse_str::<Ident>(&key)
            .map(|ident| Ident::new(&ident.to_string(), span))
            .map_err(|_| syn::Error::new(span, format!("relation name `{}` is not an identifier", key)))
    }
}
