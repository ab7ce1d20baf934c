//! Attribute descriptors and the request builder.
//!
//! An [`Attribute`] is a static declaration binding a command template to a
//! decoder (read side) and an encoder (write side). It never touches the
//! transport: [`Attribute::query`] and [`Attribute::command`] only render a
//! [`Request`], which an engine executes or a batch accumulates.
//!
//! # Example
//! ```
//! use pace_scpi::attribute::Attribute;
//! use pace_scpi::codec;
//!
//! static PRESSURE: Attribute<f64> =
//!     Attribute::read_only("pressure", "SENS{module}:PRES", codec::float);
//!
//! let request = PRESSURE.query(Some(1)).unwrap();
//! assert_eq!(request.text(), ":SENS1:PRES?");
//! assert_eq!(request.resolve(":SENS1:PRES 34.567").unwrap(), 34.567);
//! ```

use crate::codec;
use crate::error::{PaceError, PaceResult};
use crate::value::{AttrValue, Value};
use std::fmt;

/// Decoder bound to an attribute.
pub type Decoder<T> = fn(&str) -> PaceResult<T>;

/// Encoder bound to an attribute.
pub type Encoder<T> = fn(&T) -> String;

/// Placeholder substituted with the module id at render time.
pub const MODULE_PLACEHOLDER: &str = "{module}";

/// Query appended to writes of attributes that cannot read back.
pub const ACK_QUERY: &str = ":SYST:ERR?";

/// Device rejection sentinel.
pub const NACK: &str = "NACK";

/// Static attribute declaration.
///
/// Constructors guarantee that at least one of decoder or encoder is bound.
pub struct Attribute<T> {
    name: &'static str,
    template: &'static str,
    decode: Option<Decoder<T>>,
    encode: Option<Encoder<T>>,
    cacheable: bool,
}

impl<T> Clone for Attribute<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Attribute<T> {}

impl<T> fmt::Debug for Attribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("template", &self.template)
            .field("readable", &self.decode.is_some())
            .field("writable", &self.encode.is_some())
            .field("cacheable", &self.cacheable)
            .finish()
    }
}

impl<T> Attribute<T> {
    pub const fn read_only(name: &'static str, template: &'static str, decode: Decoder<T>) -> Self {
        Self {
            name,
            template,
            decode: Some(decode),
            encode: None,
            cacheable: false,
        }
    }

    pub const fn read_write(
        name: &'static str,
        template: &'static str,
        decode: Decoder<T>,
        encode: Encoder<T>,
    ) -> Self {
        Self {
            name,
            template,
            decode: Some(decode),
            encode: Some(encode),
            cacheable: false,
        }
    }

    pub const fn write_only(name: &'static str, template: &'static str, encode: Encoder<T>) -> Self {
        Self {
            name,
            template,
            decode: None,
            encode: Some(encode),
            cacheable: false,
        }
    }

    /// Mark reads of this attribute as cacheable for the device lifetime.
    pub const fn cached(self) -> Self {
        Self {
            cacheable: true,
            ..self
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn template(&self) -> &'static str {
        self.template
    }

    pub fn is_readable(&self) -> bool {
        self.decode.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.encode.is_some()
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Whether the template is parameterised by a module id.
    pub fn is_module_scoped(&self) -> bool {
        self.template.contains(MODULE_PLACEHOLDER)
    }

    /// Render the command mnemonic for the given module.
    ///
    /// The module id is substituted before uppercasing; the result is
    /// prefixed with `:` unless it already denotes a global (`*`) or rooted
    /// (`:`) command.
    pub fn render(&self, module: Option<u8>) -> PaceResult<String> {
        let template = if self.is_module_scoped() {
            let id = module.ok_or_else(|| PaceError::ModuleRequired(self.template.to_string()))?;
            self.template.replace(MODULE_PLACEHOLDER, &id.to_string())
        } else {
            self.template.to_string()
        };
        let command = template.to_uppercase();
        if command.starts_with('*') || command.starts_with(':') {
            Ok(command)
        } else {
            Ok(format!(":{}", command))
        }
    }

    fn read_text(&self, module: Option<u8>) -> PaceResult<String> {
        let mut text = self.render(module)?;
        if !text.ends_with('?') {
            text.push('?');
        }
        Ok(text)
    }
}

impl<T: AttrValue> Attribute<T> {
    /// Build the read request (`TEMPLATE?`).
    pub fn query(&self, module: Option<u8>) -> PaceResult<Request<T>> {
        let decode = self
            .decode
            .ok_or_else(|| PaceError::NotReadable(self.name.to_string()))?;
        let text = self.read_text(module)?;
        let cache = if self.cacheable {
            CachePolicy::Read(text.clone())
        } else {
            CachePolicy::None
        };
        Ok(Request::new(text, decode).with_cache(cache))
    }

    /// Build the write request.
    ///
    /// Readable attributes combine the set with a read-back
    /// (`TEMPLATE value;TEMPLATE?`) and resolve to the confirmed value.
    /// Write-only attributes are followed by `:SYST:ERR?` and resolve to the
    /// written value once the device acknowledges with error code 0.
    pub fn command(&self, module: Option<u8>, value: T) -> PaceResult<Request<T>> {
        let encode = self
            .encode
            .ok_or_else(|| PaceError::NotWritable(self.name.to_string()))?;
        let set = format!("{} {}", self.render(module)?, encode(&value));

        match self.decode {
            Some(decode) => {
                let read = self.read_text(module)?;
                let cache = if self.cacheable {
                    CachePolicy::Store(read.clone())
                } else {
                    CachePolicy::None
                };
                Ok(Request::new(format!("{};{}", set, read), decode).with_cache(cache))
            }
            None => Ok(Request::from_fn(format!("{};{}", set, ACK_QUERY), move |reply| {
                codec::acknowledge(reply).map(|_| value.clone())
            })),
        }
    }
}

/// How the engine treats the result cache for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePolicy {
    /// Bypass the cache
    None,
    /// Serve from the cache under this key, populate it on a miss
    Read(String),
    /// Invalidate this key, then store the confirmed value
    Store(String),
}

impl CachePolicy {
    pub fn key(&self) -> Option<&str> {
        match self {
            CachePolicy::None => None,
            CachePolicy::Read(key) | CachePolicy::Store(key) => Some(key),
        }
    }
}

type BoxedDecoder<T> = Box<dyn Fn(&str) -> PaceResult<T> + Send + Sync>;

/// Rendered protocol text plus the decoder for its reply.
///
/// Produced fresh per invocation and consumed by exactly one engine call or
/// batch.
pub struct Request<T> {
    text: String,
    // one entry per `;`-separated sub-command, true for queries
    parts: Vec<bool>,
    decode: BoxedDecoder<T>,
    cache: CachePolicy,
}

impl<T: 'static> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("text", &self.text)
            .field("fragments", &self.fragments())
            .field("cache", &self.cache)
            .finish()
    }
}

impl<T: 'static> Request<T> {
    pub fn new(text: impl Into<String>, decode: Decoder<T>) -> Self {
        Self::from_fn(text, decode)
    }

    pub fn from_fn<F>(text: impl Into<String>, decode: F) -> Self
    where
        F: Fn(&str) -> PaceResult<T> + Send + Sync + 'static,
    {
        let text = text.into();
        Self {
            parts: sub_commands(&text),
            text,
            decode: Box::new(decode),
            cache: CachePolicy::None,
        }
    }

    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of reply fragments this request produces. Each `?`-terminated
    /// sub-command yields one; sets yield none.
    pub fn fragments(&self) -> usize {
        self.parts.iter().filter(|query| **query).count()
    }

    /// Query flag of each sub-command, in wire order.
    pub fn parts(&self) -> &[bool] {
        &self.parts
    }

    pub fn cache(&self) -> &CachePolicy {
        &self.cache
    }

    /// Decode this request's own reply fragments.
    pub fn decode_fragments(&self, fragments: &[&str]) -> PaceResult<T> {
        if fragments.iter().any(|fragment| *fragment == NACK) {
            return Err(PaceError::Nack {
                request: self.text.clone(),
            });
        }
        (self.decode)(&fragments.join(";"))
    }

    /// Decode a whole reply line issued for this request alone.
    ///
    /// Surplus leading fragments (devices that echo the set half of a
    /// combined request) are ignored.
    pub fn resolve(&self, reply: &str) -> PaceResult<T> {
        let fragments = split_reply(reply);
        if fragments.iter().any(|fragment| *fragment == NACK) {
            return Err(PaceError::Nack {
                request: self.text.clone(),
            });
        }
        let expected = self.fragments();
        if fragments.len() < expected {
            return Err(PaceError::decode("one fragment per query", reply));
        }
        self.decode_fragments(&fragments[fragments.len() - expected..])
    }

    /// Map the decoded value, keeping text and cache policy.
    pub fn map<U, F>(self, f: F) -> Request<U>
    where
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let decode = self.decode;
        Request {
            text: self.text,
            parts: self.parts,
            decode: Box::new(move |reply| decode(reply).map(&f)),
            cache: self.cache,
        }
    }
}

impl<T: AttrValue> Request<T> {
    /// Erase the value type.
    pub fn erase(self) -> Request<Value> {
        self.map(AttrValue::into_value)
    }
}

/// Split a reply line into trimmed fragments. An empty line has none.
pub fn split_reply(reply: &str) -> Vec<&str> {
    let reply = reply.trim();
    if reply.is_empty() {
        Vec::new()
    } else {
        reply.split(';').map(str::trim).collect()
    }
}

/// Whether a protocol line reads a reply, i.e. holds at least one query.
pub fn is_query_line(line: &str) -> bool {
    line.split(';').any(|part| part.trim_end().ends_with('?'))
}

fn sub_commands(text: &str) -> Vec<bool> {
    text.split(';')
        .map(|part| part.trim_end().ends_with('?'))
        .collect()
}

/// Type-erased view of an [`Attribute`], used by name-based lookups.
pub trait DynAttribute: Send + Sync {
    fn name(&self) -> &'static str;

    fn template(&self) -> &'static str;

    fn is_readable(&self) -> bool;

    fn is_writable(&self) -> bool;

    fn render(&self, module: Option<u8>) -> PaceResult<String>;

    fn query_value(&self, module: Option<u8>) -> PaceResult<Request<Value>>;

    fn command_value(&self, module: Option<u8>, value: &Value) -> PaceResult<Request<Value>>;

    /// Parse user-supplied text with the attribute's own decoder.
    fn parse(&self, text: &str) -> PaceResult<Value>;
}

impl<T: AttrValue> DynAttribute for Attribute<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn template(&self) -> &'static str {
        self.template
    }

    fn is_readable(&self) -> bool {
        Attribute::is_readable(self)
    }

    fn is_writable(&self) -> bool {
        Attribute::is_writable(self)
    }

    fn render(&self, module: Option<u8>) -> PaceResult<String> {
        Attribute::render(self, module)
    }

    fn query_value(&self, module: Option<u8>) -> PaceResult<Request<Value>> {
        self.query(module).map(Request::erase)
    }

    fn command_value(&self, module: Option<u8>, value: &Value) -> PaceResult<Request<Value>> {
        let value = T::from_value(value)?;
        self.command(module, value).map(Request::erase)
    }

    fn parse(&self, text: &str) -> PaceResult<Value> {
        let decode = self
            .decode
            .ok_or_else(|| PaceError::NotReadable(self.name.to_string()))?;
        decode(text).map(AttrValue::into_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static PRESSURE: Attribute<f64> =
        Attribute::read_only("pressure", "SENS{module}:PRES", codec::float);
    static CONTROL: Attribute<bool> = Attribute::read_write(
        "pressure_control",
        "OUTP{module}:STAT",
        codec::boolean,
        codec::encode_bool,
    );
    static ZERO: Attribute<bool> = Attribute::write_only("zero", "CAL{module}:ZERO", codec::encode_bool);
    static IDN: Attribute<String> = Attribute::read_only("idn", "*IDN", codec::text).cached();

    #[test]
    fn test_render_substitutes_and_prefixes() {
        assert_eq!(PRESSURE.render(Some(1)).unwrap(), ":SENS1:PRES");
        assert_eq!(IDN.render(None).unwrap(), "*IDN");
        assert!(matches!(
            PRESSURE.render(None),
            Err(PaceError::ModuleRequired(_))
        ));
    }

    #[test]
    fn test_lowercase_template_is_uppercased() {
        static UNIT: Attribute<String> = Attribute::read_only("unit", "unit{module}:pres", codec::text);
        assert_eq!(UNIT.query(Some(2)).unwrap().text(), ":UNIT2:PRES?");
    }

    #[test]
    fn test_query_renders_and_decodes() {
        let request = PRESSURE.query(Some(1)).unwrap();
        assert_eq!(request.text(), ":SENS1:PRES?");
        assert_eq!(request.fragments(), 1);
        assert_eq!(request.cache(), &CachePolicy::None);
        assert_eq!(request.resolve(":SENS1:PRES 34.567\n").unwrap(), 34.567);
    }

    #[test]
    fn test_capability_errors() {
        assert!(matches!(
            PRESSURE.command(Some(1), 1.0),
            Err(PaceError::NotWritable(name)) if name == "pressure"
        ));
        assert!(matches!(
            ZERO.query(Some(1)),
            Err(PaceError::NotReadable(name)) if name == "zero"
        ));
    }

    #[test]
    fn test_readable_write_is_combined_with_read_back() {
        let request = CONTROL.command(Some(1), true).unwrap();
        assert_eq!(request.text(), ":OUTP1:STAT 1;:OUTP1:STAT?");
        assert_eq!(request.fragments(), 1);
        assert_eq!(request.parts(), &[false, true]);
        assert!(request.resolve("1\n").unwrap());
        // a device echoing the set half still resolves
        assert!(request.resolve(":OUTP1:STAT 1;:OUTP1:STAT 1").unwrap());
    }

    #[test]
    fn test_write_only_appends_acknowledgement() {
        let request = ZERO.command(Some(1), true).unwrap();
        assert_eq!(request.text(), ":CAL1:ZERO 1;:SYST:ERR?");
        assert!(request.resolve("0, No error").unwrap());
        assert!(matches!(
            request.resolve("-113, Undefined header"),
            Err(PaceError::Device { code: -113, message }) if message == "Undefined header"
        ));
    }

    #[test]
    fn test_cache_policy() {
        let read = IDN.query(None).unwrap();
        assert_eq!(read.cache(), &CachePolicy::Read("*IDN?".to_string()));
    }

    #[test]
    fn test_nack_is_a_failure() {
        let request = PRESSURE.query(Some(1)).unwrap();
        assert!(matches!(
            request.resolve("NACK"),
            Err(PaceError::Nack { request }) if request == ":SENS1:PRES?"
        ));
    }

    #[test]
    fn test_multi_query_template_counts_fragments() {
        let request = Request::new(":INST:SN1?;:INST:SN2?;:INST:SN3?", codec::text);
        assert_eq!(request.fragments(), 3);
        assert_eq!(request.parts(), &[true, true, true]);
        assert_eq!(split_reply(" a ; b;c\n"), vec!["a", "b", "c"]);
        assert!(split_reply("  \n").is_empty());
    }

    #[test]
    fn test_query_line_detection() {
        assert!(is_query_line("*IDN?"));
        assert!(is_query_line(":OUTP1:STAT 1;:OUTP1:STAT? "));
        assert!(!is_query_line(":OUTP1:LOG1 1;:OUTP1:LOG2 0"));
        assert!(!is_query_line(r#":SYST:LAB "who?""#));
    }

    #[test]
    fn test_dynamic_access() {
        let attr: &dyn DynAttribute = &CONTROL;
        let request = attr.command_value(Some(2), &Value::Bool(false)).unwrap();
        assert_eq!(request.text(), ":OUTP2:STAT 0;:OUTP2:STAT?");
        assert_eq!(request.resolve("0").unwrap(), Value::Bool(false));
        assert_eq!(attr.parse("1").unwrap(), Value::Bool(true));
        assert!(attr.command_value(Some(2), &Value::Text("x".into())).is_err());
    }
}
