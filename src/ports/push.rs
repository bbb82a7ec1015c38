/// Push service hint for how soon the message should reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    High,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Normal => "normal",
            Urgency::High => "high",
        }
    }
}

/// A fully prepared push message: encrypted body plus the headers a push
/// service needs to accept it.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub endpoint: String,
    pub body: Vec<u8>,
    pub authorization: String,
    pub ttl: u32,
    pub urgency: Option<Urgency>,
}

pub trait PushTransport: Clone + Send + Sync + 'static {
    type Error: std::fmt::Display + Send + Sync + 'static;
    type Fut<'a>: Future<Output = Result<u16, Self::Error>> + Send + 'a
    where
        Self: 'a;

    /// POSTs the request and yields the push service's HTTP status.
    fn post<'a>(&'a self, request: &'a PushRequest) -> Self::Fut<'a>;
}
