/// Replies that confirm the pending intent. Compared case-insensitively.
pub const AFFIRMATIONS: [&str; 6] = ["sí", "si", "confirmar", "ok", "dale", "hazlo"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Search,
    AddToCart,
    ViewCart,
    PlaceOrder,
}

impl Intent {
    /// Maps the classifier's vocabulary (`buscar`, `agregar`, `ver_carrito`,
    /// `realizar_pedido`) to an intent.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "buscar" => Some(Intent::Search),
            "agregar" => Some(Intent::AddToCart),
            "ver_carrito" => Some(Intent::ViewCart),
            "realizar_pedido" => Some(Intent::PlaceOrder),
            _ => None,
        }
    }

    pub fn requires_confirmation(&self) -> bool {
        !matches!(self, Intent::ViewCart)
    }

    pub fn confirmation_prompt(&self, parameter: Option<&str>) -> Option<String> {
        let parameter = parameter.unwrap_or_default();
        match self {
            Intent::Search => Some(format!(
                "¿Querés que busque productos relacionados con '{}'?",
                parameter
            )),
            Intent::AddToCart => Some(format!("¿Querés que agregue '{}' al carrito?", parameter)),
            Intent::PlaceOrder => Some("¿Querés que procese tu pedido ahora?".to_string()),
            Intent::ViewCart => None,
        }
    }
}

/// Classifier reply split into its raw intent token and optional parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub token: String,
    pub parameter: Option<String>,
}

impl Classification {
    pub fn intent(&self) -> Option<Intent> {
        Intent::from_token(&self.token)
    }
}

/// `intent:parameter` is split on the first colon; anything else is a bare intent.
pub fn parse_reply(reply: &str) -> Classification {
    match reply.split_once(':') {
        Some((token, parameter)) => {
            let parameter = parameter.trim();
            Classification {
                token: token.trim().to_string(),
                parameter: (!parameter.is_empty()).then(|| parameter.to_string()),
            }
        }
        None => Classification {
            token: reply.trim().to_string(),
            parameter: None,
        },
    }
}

pub fn is_affirmation(text: &str) -> bool {
    let text = text.trim().to_lowercase();
    AFFIRMATIONS.contains(&text.as_str())
}
